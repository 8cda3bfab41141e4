//! Preflight validation
//!
//! Before a job is scheduled, check that every remote file its tasks will
//! need exists. All missing files are collected so the operator can fix them
//! in one pass. An unreachable store aborts the check immediately.

use crate::catalog::{Catalog, ResourceKind};
use crate::error::{CacheError, Result};
use crate::pipeline::{PipelineConfig, ResourceSources};
use crate::plan;
use crate::storage::{RemoteStore, StoreError};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Placeholder location for kinds the configuration gives no source for
pub const NO_SOURCE: &str = "<no source configured>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingFile {
    pub kind: ResourceKind,
    pub uri: String,
}

impl fmt::Display for MissingFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.uri, self.kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreflightReport {
    /// Distinct remote files checked
    pub checked: usize,
    pub missing: Vec<MissingFile>,
}

impl PreflightReport {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty()
    }

    /// `Err(MissingResources)` when anything is missing
    pub fn into_result(self) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(CacheError::MissingResources(self.missing))
        }
    }
}

pub struct PreflightValidator {
    store: Arc<dyn RemoteStore>,
    catalog: Arc<Catalog>,
}

impl PreflightValidator {
    pub fn new(store: Arc<dyn RemoteStore>, catalog: Arc<Catalog>) -> Self {
        Self { store, catalog }
    }

    /// Check every required remote file of `kinds`
    ///
    /// Files shared between kinds (the FASTA under several indexes) are
    /// checked and reported once.
    #[instrument(skip_all, fields(kinds = kinds.len()))]
    pub async fn check(
        &self,
        kinds: &[ResourceKind],
        sources: &ResourceSources,
    ) -> Result<PreflightReport> {
        let mut report = PreflightReport::default();
        let mut seen = HashSet::new();

        for &kind in kinds {
            let entry = self.catalog.require(kind)?;
            let Some(source) = sources.get(kind) else {
                warn!(%kind, "no remote source configured");
                report.missing.push(MissingFile {
                    kind,
                    uri: NO_SOURCE.to_string(),
                });
                continue;
            };

            for (uri, required) in plan::remote_files(entry, source)? {
                if !required || !seen.insert(uri.clone()) {
                    continue;
                }
                report.checked += 1;
                match self.store.exists(&uri).await {
                    Ok(true) => debug!(%kind, %uri, "present"),
                    Ok(false) => {
                        warn!(%kind, %uri, "missing remote file");
                        report.missing.push(MissingFile { kind, uri });
                    }
                    Err(StoreError::Unreachable(detail)) => {
                        return Err(CacheError::unavailable(kind, detail))
                    }
                    Err(e) => return Err(CacheError::from_store(kind, e)),
                }
            }
        }

        info!(
            checked = report.checked,
            missing = report.missing.len(),
            "preflight finished"
        );
        Ok(report)
    }

    /// Check everything `pipeline` needs; missing files become an error
    pub async fn validate(&self, pipeline: &PipelineConfig) -> Result<PreflightReport> {
        let kinds = pipeline.required_kinds();
        let sources = pipeline.sources()?;
        self.check(&kinds, &sources).await?.into_result()
    }
}
