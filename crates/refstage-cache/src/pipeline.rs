//! Pipeline settings and the remote sources they imply
//!
//! A pipeline names a reference FASTA, an aligner and optional extras. From
//! that it derives which resource kinds a task needs and where each kind's
//! files live remotely.

use crate::catalog::{split_reference, Aligner, ResourceKind, RnaPass};
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a kind's files live in the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSource {
    /// Reference family sharing a prefix, e.g. `s3://refs/hg38` + `.fa`
    Reference { base: String, suffix: String },
    /// Directory of fixed file names; always ends with `/`
    Directory { dir: String },
    /// Individually named files
    Files { uris: Vec<String> },
}

impl ResourceSource {
    /// Source for a reference FASTA URI ending in `.fasta` or `.fa`
    pub fn reference(uri: &str) -> Result<Self> {
        let (base, suffix) = split_reference(uri).ok_or_else(|| {
            CacheError::invalid_source(
                ResourceKind::VariantDict,
                format!("reference '{uri}' must end in .fasta or .fa"),
            )
        })?;
        Ok(Self::Reference {
            base: base.to_string(),
            suffix: suffix.to_string(),
        })
    }

    pub fn directory(uri: &str) -> Self {
        let dir = if uri.ends_with('/') {
            uri.to_string()
        } else {
            format!("{uri}/")
        };
        Self::Directory { dir }
    }

    pub fn files(uris: Vec<String>) -> Self {
        Self::Files { uris }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Reference { base, suffix } => format!("reference {base}{suffix}"),
            Self::Directory { dir } => format!("directory {dir}"),
            Self::Files { uris } => format!("files {}", uris.join(", ")),
        }
    }
}

/// Remote source per kind
#[derive(Debug, Clone, Default)]
pub struct ResourceSources {
    sources: HashMap<ResourceKind, ResourceSource>,
}

impl ResourceSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: ResourceKind, source: ResourceSource) {
        self.sources.insert(kind, source);
    }

    pub fn with(mut self, kind: ResourceKind, source: ResourceSource) -> Self {
        self.insert(kind, source);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&ResourceSource> {
        self.sources.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.sources.keys().copied()
    }
}

/// What a task needs, as configured by the operator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Reference FASTA (`.fasta` or `.fa`)
    pub reference: Option<String>,
    pub aligner: Aligner,
    /// Spliced RNA alignment; replaces the aligner index with the RNA genome
    pub rna: bool,
    pub star_genome: Option<String>,
    /// Genome rebuilt between the two RNA passes
    pub star_genome_pass2: Option<String>,
    pub annotation: Option<String>,
    pub known_sites: Vec<String>,
    /// Reference files are already on a node-visible path; use them in place
    pub reference_is_local: bool,
}

impl PipelineConfig {
    /// Kinds a task of this pipeline resolves, in staging order
    pub fn required_kinds(&self) -> Vec<ResourceKind> {
        let mut kinds = Vec::new();
        if self.rna {
            kinds.push(ResourceKind::RnaGenomeIndex(RnaPass::First));
            if self.star_genome_pass2.is_some() {
                kinds.push(ResourceKind::RnaGenomeIndex(RnaPass::Second));
            }
        } else {
            kinds.push(ResourceKind::AlignerIndex(self.aligner));
        }
        kinds.push(ResourceKind::VariantDict);
        if self.annotation.is_some() {
            kinds.push(ResourceKind::AnnotationFile);
        }
        if !self.known_sites.is_empty() {
            kinds.push(ResourceKind::KnownSites);
        }
        kinds
    }

    /// Remote sources for every kind this configuration can supply
    pub fn sources(&self) -> Result<ResourceSources> {
        let mut sources = ResourceSources::new();
        if let Some(reference) = &self.reference {
            let source = ResourceSource::reference(reference)?;
            for aligner in [Aligner::Bwa, Aligner::Bowtie2, Aligner::Cushaw2] {
                sources.insert(ResourceKind::AlignerIndex(aligner), source.clone());
            }
            sources.insert(ResourceKind::VariantDict, source);
        }
        if let Some(dir) = &self.star_genome {
            sources.insert(
                ResourceKind::RnaGenomeIndex(RnaPass::First),
                ResourceSource::directory(dir),
            );
        }
        if let Some(dir) = &self.star_genome_pass2 {
            sources.insert(
                ResourceKind::RnaGenomeIndex(RnaPass::Second),
                ResourceSource::directory(dir),
            );
        }
        if let Some(annotation) = &self.annotation {
            sources.insert(
                ResourceKind::AnnotationFile,
                ResourceSource::files(vec![annotation.clone()]),
            );
        }
        if !self.known_sites.is_empty() {
            sources.insert(
                ResourceKind::KnownSites,
                ResourceSource::files(self.known_sites.clone()),
            );
        }
        Ok(sources)
    }
}
