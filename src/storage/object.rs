use bytes::Bytes;
use crate::storage::metadata::FileMetadata;

/// A file as handed to the store by an uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobFile {
    pub name: String,
    pub mime_type: String,
    /// Epoch milliseconds.
    pub last_modified: i64,
    pub content: Bytes,
}

impl BlobFile {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        last_modified: i64,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            last_modified,
            content: content.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            last_modified: self.last_modified,
            size: self.size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub content: Bytes,
    pub metadata: FileMetadata,
}

impl StoredObject {
    pub fn into_file(self) -> BlobFile {
        BlobFile {
            name: self.metadata.name,
            mime_type: self.metadata.mime_type,
            last_modified: self.metadata.last_modified,
            content: self.content,
        }
    }
}
