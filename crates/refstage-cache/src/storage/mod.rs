//! Remote store abstraction
//!
//! The coordinator and transfer engine only see [`RemoteStore`]. Two adapters
//! exist: [`local::LocalStore`] for a shared POSIX mount (plain paths or
//! `file://` URIs) and [`s3::S3Store`] for `s3://bucket/key` objects.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub mod config;
pub mod local;
pub mod s3;

pub use config::{StorageBackend, StorageConfig};
pub use local::LocalStore;
pub use s3::S3Store;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Remote object '{0}' not found")]
    NotFound(String),

    /// The store could not be contacted at all
    #[error("Remote store unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed remote location '{0}'")]
    InvalidUri(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote store error: {0}")]
    Backend(String),
}

/// Minimal operations the cache needs from shared storage
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short human description, e.g. `s3 (endpoint http://minio:9000)`
    fn describe(&self) -> String;

    async fn exists(&self, uri: &str) -> StoreResult<bool>;

    /// Byte length of a remote object
    async fn length(&self, uri: &str) -> StoreResult<u64>;

    /// Copy a remote object to a local path, replacing anything there
    async fn copy_to_local(&self, uri: &str, local: &Path) -> StoreResult<()>;

    /// Copy a local file to a remote location, replacing anything there
    async fn copy_from_local(&self, local: &Path, uri: &str) -> StoreResult<()>;

    /// Delete a remote object. Deleting a missing object is not an error.
    async fn delete(&self, uri: &str) -> StoreResult<()>;

    /// Hex SHA-256 of the object if the store knows it
    async fn checksum(&self, _uri: &str) -> StoreResult<Option<String>> {
        Ok(None)
    }
}

/// Build the store selected by `config`
pub async fn connect(config: &StorageConfig) -> StoreResult<Arc<dyn RemoteStore>> {
    let store: Arc<dyn RemoteStore> = match config.backend {
        StorageBackend::Local => Arc::new(LocalStore::new()),
        StorageBackend::S3 => Arc::new(S3Store::new(config).await?),
    };
    tracing::debug!(store = %store.describe(), "remote store ready");
    Ok(store)
}
