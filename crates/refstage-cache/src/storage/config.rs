use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Shared POSIX filesystem
    #[default]
    Local,
    /// S3-compatible object store
    S3,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "file" | "posix" => Ok(StorageBackend::Local),
            "s3" | "minio" => Ok(StorageBackend::S3),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

/// Connection settings for the remote store
///
/// Buckets come from the `s3://bucket/key` locations themselves, so nothing
/// here names one. Without explicit keys the S3 adapter falls back to the
/// standard AWS credential chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            path_style: false,
        }
    }
}

impl StorageConfig {
    /// Read `S3_*` variables, falling back to the `AWS_*` names for keys
    pub fn from_env() -> Self {
        let endpoint = env::var("S3_ENDPOINT").ok();
        Self {
            backend: if endpoint.is_some() {
                StorageBackend::S3
            } else {
                StorageBackend::Local
            },
            endpoint,
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>) -> Self {
        Self {
            backend: StorageBackend::S3,
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }

    pub fn for_aws(region: impl Into<String>) -> Self {
        Self {
            backend: StorageBackend::S3,
            region: region.into(),
            ..Self::default()
        }
    }
}
