use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use crate::error::{StorageError, StorageResult};
use crate::storage::{BlobBackend, RawMetadata};

type Inner = BTreeMap<String, (Bytes, RawMetadata)>;

/// In-process backend. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| StorageError::unavailable("memory storage lock poisoned"))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| StorageError::unavailable("memory storage lock poisoned"))
    }
}

#[async_trait::async_trait]
impl BlobBackend for MemoryStorage {
    async fn get_metadata(&self, key: &str) -> StorageResult<Option<RawMetadata>> {
        Ok(self.read()?.get(key).map(|(_, meta)| meta.clone()))
    }

    async fn get_with_metadata(
        &self,
        key: &str,
    ) -> StorageResult<Option<(Bytes, RawMetadata)>> {
        Ok(self.read()?.get(key).cloned())
    }

    async fn set(&self, key: &str, data: Bytes, meta: RawMetadata) -> StorageResult<()> {
        self.write()?.insert(key.to_string(), (data, meta));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.write()?.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> StorageResult<Vec<String>> {
        let inner = self.read()?;
        let prefix = prefix.unwrap_or("");
        Ok(inner
            .range(prefix.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let backend = MemoryStorage::new();
        for key in ["a/1", "a/2", "ab", "b/1"] {
            backend.set(key, Bytes::from_static(b"x"), RawMetadata::new()).await.unwrap();
        }

        assert_eq!(backend.list(Some("a/")).await.unwrap(), vec!["a/1", "a/2"]);
        assert_eq!(backend.list(Some("a")).await.unwrap(), vec!["a/1", "a/2", "ab"]);
        assert_eq!(backend.list(None).await.unwrap().len(), 4);
        assert!(backend.list(Some("z")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let backend = MemoryStorage::new();
        let other = backend.clone();
        backend.set("k", Bytes::from_static(b"v"), RawMetadata::new()).await.unwrap();

        assert!(other.get_metadata("k").await.unwrap().is_some());
        other.delete("k").await.unwrap();
        assert!(backend.get_with_metadata("k").await.unwrap().is_none());
    }
}
