//! Cache coordinator
//!
//! Resolves a resource kind to verified local paths. Per kind, at most one
//! process on a node stages files at a time; the others wait on the node lock
//! and then find the completed copy. The sequence under the lock is:
//!
//! 1. read the completion marker
//! 2. if it equals the kind's marker and every required file is present, done
//! 3. otherwise reuse the copy found by its detection tag, or allocate one
//! 4. verify-or-fetch every file through the transfer engine
//! 5. write the marker and release
//!
//! Any failure releases the lock without writing the marker, so the next
//! caller re-verifies from step 1.

use crate::catalog::{Catalog, CatalogEntry, ResourceKind};
use crate::error::{CacheError, Result};
use crate::lock::{peek_marker, NodeLock};
use crate::pipeline::{ResourceSource, ResourceSources};
use crate::plan::{self, LocalBase, PlannedFile};
use crate::scratch;
use crate::storage::local::uri_to_path;
use crate::transfer::{TransferEngine, TransferTask};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Default period of "still staging" log lines
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Zero disables the heartbeat
    pub heartbeat_interval: Duration,
    /// Return remote paths as-is without locking or copying
    pub reference_is_local: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reference_is_local: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolveOrigin {
    /// Marker and files were already in place
    CacheHit,
    /// Files were verified or fetched under the lock
    Staged,
    /// Remote paths used in place
    InPlace,
}

/// Local paths of a resolved resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedResource {
    pub kind: ResourceKind,
    /// Base path or directory of the local copy
    pub base: PathBuf,
    /// File consumers open first
    pub primary: PathBuf,
    /// Every member present locally, required and optional
    pub files: Vec<PathBuf>,
    pub origin: ResolveOrigin,
    /// Files actually copied during this call
    pub files_copied: usize,
}

/// Read-only view of one kind's cache state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceStatus {
    pub kind: ResourceKind,
    pub lock_path: PathBuf,
    pub marker: Option<i32>,
    pub complete: bool,
    pub base: Option<PathBuf>,
    pub local_bytes: u64,
}

pub struct CacheCoordinator {
    catalog: Arc<Catalog>,
    sources: ResourceSources,
    engine: TransferEngine,
    options: CoordinatorOptions,
}

impl CacheCoordinator {
    pub fn new(catalog: Arc<Catalog>, sources: ResourceSources, engine: TransferEngine) -> Self {
        Self {
            catalog,
            sources,
            engine,
            options: CoordinatorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    /// Resolve `kind` to verified local paths under `scratch_dir`
    #[instrument(skip(self, scratch_dir), fields(kind = %kind, scratch = %scratch_dir.display()))]
    pub async fn resolve(&self, kind: ResourceKind, scratch_dir: &Path) -> Result<ResolvedResource> {
        let entry = self.catalog.require(kind)?;
        let source = self
            .sources
            .get(kind)
            .ok_or_else(|| CacheError::unavailable(kind, "no remote source configured"))?;

        if self.options.reference_is_local {
            return resolve_in_place(entry, source);
        }

        let _heartbeat = Heartbeat::start(kind, self.options.heartbeat_interval);
        let mut lock = NodeLock::acquire(scratch_dir, &entry.lock_name).await?;

        let outcome = self.resolve_locked(entry, source, scratch_dir, &mut lock).await;
        let released = lock.release();
        let resolved = outcome?;
        released?;
        Ok(resolved)
    }

    /// Resolve several kinds in order, stopping at the first failure
    pub async fn resolve_all(
        &self,
        kinds: &[ResourceKind],
        scratch_dir: &Path,
    ) -> Result<Vec<ResolvedResource>> {
        let mut resolved = Vec::with_capacity(kinds.len());
        for kind in kinds {
            resolved.push(self.resolve(*kind, scratch_dir).await?);
        }
        Ok(resolved)
    }

    async fn resolve_locked(
        &self,
        entry: &CatalogEntry,
        source: &ResourceSource,
        scratch_dir: &Path,
        lock: &mut NodeLock,
    ) -> Result<ResolvedResource> {
        let kind = entry.kind;
        let marker = lock.read_marker()?;
        let existing = plan::find_existing(scratch_dir, entry);

        if marker == Some(entry.complete_marker) {
            if let Some(base) = &existing {
                let planned = plan::plan_files(entry, source, base)?;
                if plan::required_present(&planned) {
                    debug!(base = %base.path().display(), "cache hit");
                    return Ok(resolved(entry, base, &planned, ResolveOrigin::CacheHit, 0));
                }
            }
            warn!("completion marker set but the local copy is incomplete, re-verifying");
        } else if let Some(value) = marker {
            debug!(
                marker = value,
                expected = entry.complete_marker,
                "marker does not prove completion"
            );
        }

        let base = match existing {
            Some(base) => {
                info!(base = %base.path().display(), "verifying existing local copy");
                base
            }
            None => plan::allocate(scratch_dir, entry)?,
        };

        let planned = plan::plan_files(entry, source, &base)?;
        let store = self.engine.store();
        let mut copied = 0;

        for file in &planned {
            match store.exists(&file.remote).await {
                Ok(true) => {}
                Ok(false) if file.required => {
                    return Err(CacheError::unavailable(
                        kind,
                        format!("'{}' does not exist", file.remote),
                    ))
                }
                Ok(false) => {
                    debug!(remote = %file.remote, "optional file absent remotely");
                    continue;
                }
                Err(e) => return Err(CacheError::from_store(kind, e)),
            }

            let expected_len = store
                .length(&file.remote)
                .await
                .map_err(|e| CacheError::from_store(kind, e))?;

            let task = TransferTask::download(&file.remote, &file.local, expected_len)
                .with_verification(entry.verification)
                .with_retries(self.engine.policy().max_attempts);
            let report = self
                .engine
                .transfer(task)
                .await
                .map_err(|e| CacheError::from_transfer(kind, e))?;
            if report.copied {
                copied += 1;
            }
        }

        lock.write_marker(entry.complete_marker)?;
        info!(files = planned.len(), copied, base = %base.path().display(), "resource staged");
        Ok(resolved(entry, &base, &planned, ResolveOrigin::Staged, copied))
    }

    /// Snapshot of every catalog kind's local state, without taking locks
    pub fn status(&self, scratch_dir: &Path) -> Result<Vec<ResourceStatus>> {
        self.catalog
            .entries()
            .iter()
            .map(|entry| -> Result<ResourceStatus> {
                let lock_path = NodeLock::path_for(scratch_dir, &entry.lock_name);
                let marker = peek_marker(&lock_path)?;
                let base = plan::find_existing(scratch_dir, entry);
                let local_bytes = base.as_ref().map(base_size).unwrap_or(0);
                Ok(ResourceStatus {
                    kind: entry.kind,
                    lock_path,
                    complete: marker == Some(entry.complete_marker) && base.is_some(),
                    marker,
                    base: base.map(|b| b.path().to_path_buf()),
                    local_bytes,
                })
            })
            .collect()
    }

    /// Remove the local copy of `kind` and clear its marker; returns bytes freed
    #[instrument(skip(self, scratch_dir), fields(kind = %kind))]
    pub async fn evict(&self, kind: ResourceKind, scratch_dir: &Path) -> Result<u64> {
        let entry = self.catalog.require(kind)?;
        let mut lock = NodeLock::acquire(scratch_dir, &entry.lock_name).await?;

        let mut freed = 0;
        while let Some(base) = plan::find_existing(scratch_dir, entry) {
            freed += base.remove()?;
        }
        lock.clear_marker()?;
        lock.release()?;

        info!(bytes = freed, "local copy evicted");
        Ok(freed)
    }
}

fn base_size(base: &LocalBase) -> u64 {
    match base.path().parent() {
        Some(parent) if !base.path().is_dir() => {
            let stem = base
                .path()
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            std::fs::read_dir(parent)
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .filter(|e| plan::is_prefix_member(&e.file_name().to_string_lossy(), &stem))
                        .map(|e| scratch::folder_size(&e.path()))
                        .sum()
                })
                .unwrap_or(0)
        }
        _ => scratch::folder_size(base.path()),
    }
}

fn resolved(
    entry: &CatalogEntry,
    base: &LocalBase,
    planned: &[PlannedFile],
    origin: ResolveOrigin,
    files_copied: usize,
) -> ResolvedResource {
    ResolvedResource {
        kind: entry.kind,
        base: base.path().to_path_buf(),
        primary: plan::primary_path(entry, base, planned),
        files: planned
            .iter()
            .filter(|f| f.local.is_file())
            .map(|f| f.local.clone())
            .collect(),
        origin,
        files_copied,
    }
}

/// Remote files are already node-visible: hand back their paths unchanged
fn resolve_in_place(entry: &CatalogEntry, source: &ResourceSource) -> Result<ResolvedResource> {
    let files: Vec<PathBuf> = plan::remote_files(entry, source)?
        .into_iter()
        .filter(|(uri, required)| *required || uri_to_path(uri).is_file())
        .map(|(uri, _)| uri_to_path(&uri))
        .collect();

    let (base, primary) = match source {
        ResourceSource::Reference { base, suffix } => (
            uri_to_path(base),
            uri_to_path(&format!("{base}{suffix}")),
        ),
        ResourceSource::Directory { dir } => (uri_to_path(dir), uri_to_path(dir)),
        ResourceSource::Files { uris } => {
            let first = uris.first().map(|u| uri_to_path(u)).unwrap_or_default();
            (
                first.parent().map(Path::to_path_buf).unwrap_or_default(),
                first,
            )
        }
    };

    debug!(kind = %entry.kind, primary = %primary.display(), "using reference files in place");
    Ok(ResolvedResource {
        kind: entry.kind,
        base,
        primary,
        files,
        origin: ResolveOrigin::InPlace,
        files_copied: 0,
    })
}

/// Periodic progress log while a resolve is running; stops when dropped
struct Heartbeat(Option<JoinHandle<()>>);

impl Heartbeat {
    fn start(kind: ResourceKind, period: Duration) -> Self {
        if period.is_zero() {
            return Self(None);
        }
        let node = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        Self(Some(tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!(
                    %kind,
                    %node,
                    elapsed_secs = started.elapsed().as_secs(),
                    "still staging"
                );
            }
        })))
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}
