//! Configuration management for the refstage CLI
//!
//! Settings are layered, later layers winning:
//!
//! 1. built-in defaults, storage seeded from `S3_*` variables
//! 2. a TOML file (`--config` or `REFSTAGE_CONFIG`)
//! 3. `REFSTAGE_*` environment variables, nested keys split on `__`
//!    (`REFSTAGE_STORAGE__BACKEND=s3`, `REFSTAGE_PIPELINE__REFERENCE=...`)
//! 4. command-line flags
//!
//! ```toml
//! scratch_dir = "/scratch/refstage"
//!
//! [storage]
//! backend = "s3"
//! endpoint = "http://minio:9000"
//! path_style = true
//!
//! [pipeline]
//! reference = "s3://refs/hg38.fasta"
//! aligner = "bwa"
//! known_sites = ["s3://refs/dbsnp_138.vcf.gz"]
//!
//! [transfer]
//! checksum_kinds = ["known-sites"]
//! ```

use crate::error::{CliError, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use refstage_cache::coordinator::DEFAULT_HEARTBEAT_INTERVAL;
use refstage_cache::transfer::{MAX_ATTEMPTS, RETRY_DELAY};
use refstage_cache::{
    storage, CacheCoordinator, Catalog, CoordinatorOptions, PipelineConfig, PreflightValidator,
    RemoteStore, ResourceKind, ResourceSources, StorageConfig, TransferEngine, TransferPolicy,
    Verification,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// CLI Configuration Constants
// ============================================================================

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "REFSTAGE_";

/// Directory under the user cache dir used when no scratch dir is configured
pub const DEFAULT_SCRATCH_SUBDIR: &str = "refstage";

/// Retry and verification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    /// Period of "still staging" log lines; 0 disables them
    pub heartbeat_secs: u64,
    /// Kinds verified by SHA-256 in addition to size
    pub checksum_kinds: Vec<ResourceKind>,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            retry_delay_secs: RETRY_DELAY.as_secs(),
            heartbeat_secs: DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
            checksum_kinds: Vec::new(),
        }
    }
}

/// Effective CLI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Node-local scratch directory holding locks and cached copies
    pub scratch_dir: PathBuf,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub transfer: TransferSettings,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            storage: StorageConfig::default(),
            pipeline: PipelineConfig::default(),
            transfer: TransferSettings::default(),
        }
    }
}

/// `<user cache dir>/refstage`, or under the temp dir when there is no cache dir
pub fn default_scratch_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DEFAULT_SCRATCH_SUBDIR)
}

impl StageConfig {
    /// Layer defaults, the optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // S3_* variables seed the storage defaults; file and REFSTAGE_* still win
        let defaults = Self {
            storage: StorageConfig::from_env(),
            ..Self::default()
        };
        let mut figment = Figment::from(Serialized::defaults(defaults));

        if let Some(path) = path {
            if !path.exists() {
                return Err(CliError::config(format!(
                    "config file '{}' does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config: Self = figment.extract()?;
        if config.transfer.max_attempts == 0 {
            return Err(CliError::config("transfer.max_attempts must be at least 1"));
        }
        tracing::debug!(scratch = %config.scratch_dir.display(), "configuration loaded");
        Ok(config)
    }

    /// Apply the `--scratch-dir` override
    pub fn with_scratch_dir(mut self, scratch_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = scratch_dir {
            self.scratch_dir = dir;
        }
        self
    }

    /// The standard catalog with configured checksum kinds applied
    pub fn catalog(&self) -> Catalog {
        self.transfer
            .checksum_kinds
            .iter()
            .fold(Catalog::standard(), |catalog, kind| {
                catalog.with_verification(*kind, Verification::Checksum)
            })
    }

    pub fn policy(&self) -> TransferPolicy {
        TransferPolicy {
            max_attempts: self.transfer.max_attempts,
            retry_delay: Duration::from_secs(self.transfer.retry_delay_secs),
        }
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            heartbeat_interval: Duration::from_secs(self.transfer.heartbeat_secs),
            reference_is_local: self.pipeline.reference_is_local,
        }
    }

    pub async fn store(&self) -> Result<Arc<dyn RemoteStore>> {
        Ok(storage::connect(&self.storage).await?)
    }

    pub async fn engine(&self) -> Result<TransferEngine> {
        Ok(TransferEngine::new(self.store().await?).with_policy(self.policy()))
    }

    pub async fn coordinator(&self) -> Result<CacheCoordinator> {
        let coordinator = CacheCoordinator::new(
            Arc::new(self.catalog()),
            self.pipeline.sources()?,
            self.engine().await?,
        );
        Ok(coordinator.with_options(self.coordinator_options()))
    }

    /// Coordinator over the local filesystem only, for status inspection
    pub fn local_coordinator(&self) -> CacheCoordinator {
        let engine = TransferEngine::new(Arc::new(storage::LocalStore::new()));
        CacheCoordinator::new(Arc::new(self.catalog()), ResourceSources::new(), engine)
    }

    pub async fn preflight(&self) -> Result<PreflightValidator> {
        Ok(PreflightValidator::new(
            self.store().await?,
            Arc::new(self.catalog()),
        ))
    }
}
