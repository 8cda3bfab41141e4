//! Error taxonomy for staging reference data
//!
//! The variants separate failures a caller can do something about from
//! terminal ones:
//!
//! - [`CacheError::TransferFailed`] is produced by the transfer engine once its
//!   retry budget for a single file is spent. The coordinator never surfaces it
//!   directly; it becomes [`CacheError::ResourceCorrupt`].
//! - [`CacheError::StoreUnreachable`] is the engine giving up on a file because
//!   the store cannot be contacted. It becomes [`CacheError::ResourceUnavailable`].
//! - [`CacheError::ResourceUnavailable`] means the store is unreachable or the
//!   resource does not exist remotely. Not retried.
//! - [`CacheError::LockUnavailable`] is a filesystem-level failure on the node
//!   lock file. Fatal.

use crate::catalog::ResourceKind;
use crate::preflight::MissingFile;
use crate::storage::StoreError;
use refstage_common::StageError;
use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    /// A single file copy exhausted its attempts
    #[error("Transfer of '{from}' to '{to}' failed after {attempts} attempt(s): {reason}")]
    TransferFailed {
        from: String,
        to: String,
        attempts: u32,
        reason: String,
    },

    /// The store dropped out during a copy; attempts stop at the first sign of it
    #[error("Remote store unreachable while transferring '{remote}': {reason}")]
    StoreUnreachable { remote: String, reason: String },

    /// The remote store cannot provide the resource
    #[error("Resource {kind} is unavailable: {detail}")]
    ResourceUnavailable { kind: ResourceKind, detail: String },

    /// Verified transfers were exhausted without reaching a complete copy
    #[error("Resource {kind} could not be staged to a verified state: {last_error}")]
    ResourceCorrupt {
        kind: ResourceKind,
        last_error: String,
    },

    /// The node lock file could not be created, locked or written
    #[error("Node lock '{path}' is unavailable: {source}")]
    LockUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Preflight found remote files missing
    #[error("Missing remote reference files: {}", format_missing(.0))]
    MissingResources(Vec<MissingFile>),

    #[error("Resource kind '{0}' is not known. Run 'refstage catalog' to list kinds.")]
    UnknownKind(String),

    /// A configured remote location does not fit the resource kind
    #[error("Invalid source for {kind}: {detail}")]
    InvalidSource { kind: ResourceKind, detail: String },

    #[error("Scratch I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] StageError),
}

fn format_missing(missing: &[MissingFile]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl CacheError {
    pub fn unavailable(kind: ResourceKind, detail: impl Into<String>) -> Self {
        Self::ResourceUnavailable {
            kind,
            detail: detail.into(),
        }
    }

    /// Wrap the last underlying failure of a resolve as terminal corruption
    pub fn corrupt(kind: ResourceKind, last: &CacheError) -> Self {
        Self::ResourceCorrupt {
            kind,
            last_error: last.to_string(),
        }
    }

    pub fn invalid_source(kind: ResourceKind, detail: impl Into<String>) -> Self {
        Self::InvalidSource {
            kind,
            detail: detail.into(),
        }
    }

    pub fn lock(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::LockUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Map a store failure observed while resolving `kind`
    pub fn from_store(kind: ResourceKind, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(uri) => Self::unavailable(kind, format!("'{uri}' does not exist")),
            other => Self::unavailable(kind, other.to_string()),
        }
    }

    /// Map a failed file transfer observed while resolving `kind`
    pub fn from_transfer(kind: ResourceKind, err: CacheError) -> Self {
        match err {
            Self::StoreUnreachable { reason, .. } => {
                Self::from_store(kind, StoreError::Unreachable(reason))
            }
            other => Self::corrupt(kind, &other),
        }
    }

    /// Whether retrying the same call could succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransferFailed { .. })
    }
}
