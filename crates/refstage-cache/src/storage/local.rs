//! Store adapter for a shared POSIX mount

use super::{RemoteStore, StoreError, StoreResult};
use async_trait::async_trait;
use refstage_common::checksum::compute_file_checksum;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Remote locations are plain paths, optionally written as `file://` URIs
#[derive(Debug, Clone, Default)]
pub struct LocalStore;

impl LocalStore {
    pub fn new() -> Self {
        Self
    }
}

/// Strip an optional `file://` scheme
pub fn uri_to_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

fn map_io(uri: &str, err: std::io::Error) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::NotFound(uri.to_string())
    } else {
        StoreError::Io(err)
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    fn describe(&self) -> String {
        "local filesystem".to_string()
    }

    async fn exists(&self, uri: &str) -> StoreResult<bool> {
        match tokio::fs::metadata(uri_to_path(uri)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn length(&self, uri: &str) -> StoreResult<u64> {
        let meta = tokio::fs::metadata(uri_to_path(uri))
            .await
            .map_err(|e| map_io(uri, e))?;
        Ok(meta.len())
    }

    async fn copy_to_local(&self, uri: &str, local: &Path) -> StoreResult<()> {
        let bytes = tokio::fs::copy(uri_to_path(uri), local)
            .await
            .map_err(|e| map_io(uri, e))?;
        debug!(uri, local = %local.display(), bytes, "copied from shared mount");
        Ok(())
    }

    async fn copy_from_local(&self, local: &Path, uri: &str) -> StoreResult<()> {
        let dest = uri_to_path(uri);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &dest).await?;
        Ok(())
    }

    async fn delete(&self, uri: &str) -> StoreResult<()> {
        match tokio::fs::remove_file(uri_to_path(uri)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn checksum(&self, uri: &str) -> StoreResult<Option<String>> {
        let path = uri_to_path(uri);
        let digest = tokio::task::spawn_blocking(move || compute_file_checksum(path))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Some(digest))
    }
}
