use thiserror::Error;

pub type StorageError = anyhow::Error;

/// Failure reported by a [`TrackingStore`](crate::api::store::TrackingStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("the resource {0} already exists")]
    AlreadyExists(String),
    #[error("the resource {0} does not exist")]
    DoesNotExist(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("the tracking store is unreachable: {0}")]
    Unavailable(String),
    #[error("unsupported by this store: {0}")]
    Unsupported(String),
    #[error("local file access failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("an error ocurred in the storage backend: {0:?}")]
    Storage(#[from] StorageError),
}

impl StoreError {
    pub fn does_not_exist(what: impl std::fmt::Display) -> Self {
        StoreError::DoesNotExist(what.to_string())
    }
}
