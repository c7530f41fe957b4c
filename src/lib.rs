//! Keyed blob storage with metadata-preserving round trips and cursor-based
//! listing, plus the upload and retrieval plumbing around it.

pub mod config;
pub mod error;
pub mod server;
pub mod storage;
pub mod uploads;

pub use error::{StorageError, StorageResult};
pub use storage::{BlobFile, BlobStore, ListEntry, ListOptions, ListPage, StoredObject};
