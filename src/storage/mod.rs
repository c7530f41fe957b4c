pub mod backend;
pub mod blob_store;
pub mod lister;
pub mod local;
pub mod memory;
pub mod metadata;
pub mod object;

pub use backend::*;
pub use blob_store::BlobStore;
pub use lister::{ListEntry, ListOptions, ListPage};
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use metadata::*;
pub use object::*;
