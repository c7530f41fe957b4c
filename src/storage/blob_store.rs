use std::sync::Arc;

use tracing::debug;
use crate::error::StorageResult;
use crate::storage::{
    lister::{self, ListEntry, ListOptions, ListPage, DEFAULT_HYDRATE_CONCURRENCY},
    BlobBackend, BlobFile, FileMetadata, StoredObject,
};

const LIST_ALL_PAGE_SIZE: usize = 500;

/// Stores files under string keys on top of a bytes-plus-metadata backend.
///
/// Every call goes to the backend; nothing is cached.
pub struct BlobStore<B: ?Sized = dyn BlobBackend> {
    backend: Arc<B>,
    list_concurrency: usize,
}

impl<B: ?Sized> Clone for BlobStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            list_concurrency: self.list_concurrency,
        }
    }
}

impl<B: BlobBackend> BlobStore<B> {
    pub fn new(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }
}

impl<B: BlobBackend + ?Sized> BlobStore<B> {
    pub fn from_arc(backend: Arc<B>) -> Self {
        Self {
            backend,
            list_concurrency: DEFAULT_HYDRATE_CONCURRENCY,
        }
    }

    /// Upper bound on metadata fetches in flight while hydrating a page.
    pub fn with_list_concurrency(mut self, concurrency: usize) -> Self {
        self.list_concurrency = concurrency.max(1);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.backend.get_metadata(key).await?.is_some())
    }

    pub async fn set(&self, key: &str, file: &BlobFile) -> StorageResult<()> {
        debug!("set key='{}' size={} type={}", key, file.size(), file.mime_type);
        self.backend
            .set(key, file.content.clone(), file.metadata().to_raw())
            .await
    }

    pub async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>> {
        let (content, raw) = match self.backend.get_with_metadata(key).await? {
            Some(found) => found,
            None => {
                debug!("get key='{}' -> absent", key);
                return Ok(None);
            }
        };

        let metadata = FileMetadata::from_raw(key, &raw, content.len() as u64);
        debug!("get key='{}' size={}", key, metadata.size);
        Ok(Some(StoredObject {
            key: key.to_string(),
            content,
            metadata,
        }))
    }

    /// Stores `file` and hands it straight back; the result is not re-read.
    pub async fn put(&self, key: &str, file: BlobFile) -> StorageResult<BlobFile> {
        self.set(key, &file).await?;
        Ok(file)
    }

    pub async fn remove(&self, key: &str) -> StorageResult<()> {
        debug!("remove key='{}'", key);
        self.backend.delete(key).await
    }

    pub async fn list(&self, options: &ListOptions) -> StorageResult<ListPage> {
        lister::list_page(&*self.backend, options, self.list_concurrency).await
    }

    /// Follows cursors until the listing is exhausted.
    pub async fn list_all(
        &self,
        prefix: Option<&str>,
        include_metadata: bool,
    ) -> StorageResult<Vec<ListEntry>> {
        let mut options = ListOptions {
            prefix: prefix.map(str::to_string),
            limit: Some(LIST_ALL_PAGE_SIZE),
            cursor: None,
            include_metadata,
        };
        let mut entries = Vec::new();

        loop {
            let page = self.list(&options).await?;
            entries.extend(page.entries);
            match page.next_cursor {
                Some(cursor) => options.cursor = Some(cursor),
                None => return Ok(entries),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::storage::{MemoryStorage, RawMetadata};

    fn photo() -> BlobFile {
        BlobFile::new("photo.png", "image/png", 1_699_999_999_000, vec![7u8; 2048])
    }

    #[tokio::test]
    async fn test_round_trip_preserves_metadata() {
        let store = BlobStore::new(MemoryStorage::new());
        store.set("x", &photo()).await.unwrap();

        let stored = store.get("x").await.unwrap().unwrap();
        assert_eq!(stored.key, "x");
        assert_eq!(stored.content, photo().content);
        assert_eq!(
            stored.metadata,
            FileMetadata {
                name: "photo.png".to_string(),
                mime_type: "image/png".to_string(),
                last_modified: 1_699_999_999_000,
                size: 2048,
            }
        );
        assert_eq!(stored.into_file(), photo());
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = BlobStore::new(MemoryStorage::new());
        assert!(store.get("missing").await.unwrap().is_none());
        assert!(!store.has("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_foreign_record_gets_defaults() {
        let backend = MemoryStorage::new();
        backend.set("raw/thing", Bytes::from_static(b"abc"), RawMetadata::new()).await.unwrap();

        let stored = BlobStore::new(backend).get("raw/thing").await.unwrap().unwrap();
        assert_eq!(stored.metadata.name, "raw/thing");
        assert_eq!(stored.metadata.mime_type, "application/octet-stream");
        assert_eq!(stored.metadata.size, 3);
    }

    #[tokio::test]
    async fn test_put_echoes_input() {
        let store = BlobStore::new(MemoryStorage::new());
        let echoed = store.put("x", photo()).await.unwrap();

        assert_eq!(echoed, photo());
        assert!(store.has("x").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = BlobStore::new(MemoryStorage::new());
        store.set("x", &photo()).await.unwrap();
        store
            .set("x", &BlobFile::new("notes.txt", "text/plain", 1, "hi"))
            .await
            .unwrap();

        let stored = store.get("x").await.unwrap().unwrap();
        assert_eq!(&stored.content[..], b"hi");
        assert_eq!(stored.metadata.name, "notes.txt");
        assert_eq!(stored.metadata.size, 2);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = BlobStore::new(MemoryStorage::new());
        store.set("x", &photo()).await.unwrap();

        store.remove("x").await.unwrap();
        assert!(!store.has("x").await.unwrap());
        store.remove("x").await.unwrap();
        assert!(!store.has("x").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_all_crosses_page_boundaries() {
        let store = BlobStore::new(MemoryStorage::new());
        for i in 0..(LIST_ALL_PAGE_SIZE + 3) {
            store
                .set(&format!("k/{:04}", i), &BlobFile::new("f", "text/plain", 0, "1"))
                .await
                .unwrap();
        }

        let entries = store.list_all(Some("k/"), false).await.unwrap();
        assert_eq!(entries.len(), LIST_ALL_PAGE_SIZE + 3);
        assert_eq!(entries[0].key, "k/0000");
        assert_eq!(entries.last().unwrap().key, format!("k/{:04}", LIST_ALL_PAGE_SIZE + 2));
    }

    #[tokio::test]
    async fn test_trait_object_store() {
        let backend: Arc<dyn BlobBackend> = Arc::new(MemoryStorage::new());
        let store: BlobStore = BlobStore::from_arc(backend);
        store.set("x", &photo()).await.unwrap();
        assert!(store.has("x").await.unwrap());
    }
}
