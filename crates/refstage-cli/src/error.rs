//! Error types for the refstage CLI
//!
//! Messages are user-facing and say what to check next.

use refstage_cache::{CacheError, StoreError};
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check refstage.toml and REFSTAGE_* environment variables ('refstage config show').")]
    Config(String),

    /// Staging or preflight failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The remote store could not be set up or used
    #[error("Remote store error: {0}. Check the [storage] settings.")]
    Store(#[from] StoreError),

    /// Required local file is missing
    #[error("File not found: '{0}'. Verify the path exists and is readable.")]
    FileNotFound(String),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to render TOML: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Process exit status; distinct codes let job wrappers tell failures apart
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Cache(CacheError::MissingResources(_)) => 3,
            Self::Cache(CacheError::ResourceUnavailable { .. })
            | Self::Cache(CacheError::StoreUnreachable { .. })
            | Self::Store(_) => 4,
            Self::Cache(CacheError::ResourceCorrupt { .. }) => 5,
            Self::Cache(CacheError::LockUnavailable { .. }) => 6,
            Self::Cache(CacheError::UnknownKind(_)) => 2,
            _ => 1,
        }
    }
}
