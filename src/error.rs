use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Failures surfaced by a backend. Absence is never an error: lookups of
/// missing keys come back as `None`.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(#[source] BoxError),
}

impl StorageError {
    pub fn unavailable<E: Into<BoxError>>(source: E) -> Self {
        Self::Unavailable(source.into())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::unavailable(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::unavailable(err)
    }
}

