//! Refstage cache library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Stages shared reference data (genome FASTA, aligner indexes, RNA genome
//! indexes, annotations, known-variant sites) from a remote store onto each
//! worker node's scratch disk, once per node, no matter how many tasks on that
//! node ask for it concurrently.
//!
//! - [`catalog`]: which files make up each resource kind
//! - [`lock`]: node-local exclusive locks with a completion marker
//! - [`transfer`]: size-verified, retried file copies
//! - [`coordinator`]: lock, check, fetch, mark
//! - [`preflight`]: remote existence checks before a job starts
//! - [`storage`]: the remote store seam and its local and S3 adapters
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use refstage_cache::{
//!     CacheCoordinator, Catalog, PipelineConfig, ResourceKind, TransferEngine,
//!     storage::LocalStore,
//! };
//!
//! # async fn run() -> refstage_cache::Result<()> {
//! let pipeline = PipelineConfig {
//!     reference: Some("/mnt/shared/refs/hg38.fasta".to_string()),
//!     ..Default::default()
//! };
//! let engine = TransferEngine::new(Arc::new(LocalStore::new()));
//! let coordinator =
//!     CacheCoordinator::new(Arc::new(Catalog::standard()), pipeline.sources()?, engine);
//!
//! let dict = coordinator
//!     .resolve(ResourceKind::VariantDict, Path::new("/scratch/refstage"))
//!     .await?;
//! println!("{}", dict.primary.display());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod pipeline;
pub mod plan;
pub mod preflight;
pub mod scratch;
pub mod storage;
pub mod transfer;

pub use catalog::{Aligner, Catalog, CatalogEntry, ResourceKind, RnaPass, Verification};
pub use coordinator::{
    CacheCoordinator, CoordinatorOptions, ResolveOrigin, ResolvedResource, ResourceStatus,
};
pub use error::{CacheError, Result};
pub use lock::NodeLock;
pub use pipeline::{PipelineConfig, ResourceSource, ResourceSources};
pub use preflight::{MissingFile, PreflightReport, PreflightValidator};
pub use storage::{RemoteStore, StorageConfig, StoreError};
pub use transfer::{
    CounterSnapshot, TransferCounters, TransferEngine, TransferPolicy, TransferReport,
    TransferTask,
};
