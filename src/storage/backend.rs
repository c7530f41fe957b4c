use async_trait::async_trait;
use bytes::Bytes;
use crate::error::StorageResult;
use crate::storage::RawMetadata;

/// A key -> (bytes, flat metadata) store bound to one namespace.
///
/// Writes are whole-object and last-writer-wins. Nothing here retries; a
/// failed call is reported as [`StorageError::Unavailable`] and the caller
/// decides what to do about it.
///
/// [`StorageError::Unavailable`]: crate::error::StorageError::Unavailable
#[async_trait]
pub trait BlobBackend: Send + Sync {
    async fn get_metadata(
        &self,
        key: &str,
    ) -> StorageResult<Option<RawMetadata>>;

    async fn get_with_metadata(
        &self,
        key: &str,
    ) -> StorageResult<Option<(Bytes, RawMetadata)>>;

    async fn set(
        &self,
        key: &str,
        data: Bytes,
        meta: RawMetadata,
    ) -> StorageResult<()>;

    /// Removing a missing key succeeds.
    async fn delete(
        &self,
        key: &str,
    ) -> StorageResult<()>;

    /// Every key under `prefix`, in no particular order.
    async fn list(
        &self,
        prefix: Option<&str>,
    ) -> StorageResult<Vec<String>>;
}

#[async_trait]
impl<B: BlobBackend + ?Sized> BlobBackend for std::sync::Arc<B> {
    async fn get_metadata(&self, key: &str) -> StorageResult<Option<RawMetadata>> {
        (**self).get_metadata(key).await
    }

    async fn get_with_metadata(
        &self,
        key: &str,
    ) -> StorageResult<Option<(Bytes, RawMetadata)>> {
        (**self).get_with_metadata(key).await
    }

    async fn set(&self, key: &str, data: Bytes, meta: RawMetadata) -> StorageResult<()> {
        (**self).set(key, data, meta).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        (**self).delete(key).await
    }

    async fn list(&self, prefix: Option<&str>) -> StorageResult<Vec<String>> {
        (**self).list(prefix).await
    }
}
