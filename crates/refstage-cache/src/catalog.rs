//! Resource catalog
//!
//! Static description of every kind of reference data a worker can stage:
//! which files make up a complete copy, how the local copy is found again
//! later, which node lock serializes it and which marker value proves it
//! complete. The catalog is pure data; nothing here touches the filesystem.
//!
//! File suffixes are written against the canonical `.fasta` reference name.
//! When the configured reference ends in `.fa` the remote names are derived
//! with [`substitute_suffix`]; local copies always keep the canonical names.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical reference extension used by catalog suffixes
pub const FASTA_SUFFIX: &str = ".fasta";
/// Short reference extension accepted on remote names
pub const FA_SUFFIX: &str = ".fa";

/// Marker value for most kinds
pub const DEFAULT_COMPLETE_MARKER: i32 = 1;
/// Marker value for aligner indexes, whose lock also guards the FASTA itself
pub const REFERENCE_AND_INDEX_MARKER: i32 = 2;

/// Short-read aligner whose index is staged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aligner {
    #[default]
    Bwa,
    Bowtie2,
    Cushaw2,
}

impl Aligner {
    pub fn name(self) -> &'static str {
        match self {
            Aligner::Bwa => "bwa",
            Aligner::Bowtie2 => "bowtie2",
            Aligner::Cushaw2 => "cushaw2",
        }
    }
}

impl FromStr for Aligner {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bwa" => Ok(Aligner::Bwa),
            "bowtie2" | "bowtie" => Ok(Aligner::Bowtie2),
            "cushaw2" | "cushaw" => Ok(Aligner::Cushaw2),
            _ => Err(CacheError::UnknownKind(s.to_string())),
        }
    }
}

/// First or second pass of two-pass RNA alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RnaPass {
    First,
    Second,
}

/// Kind of reference data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourceKind {
    AlignerIndex(Aligner),
    AnnotationFile,
    VariantDict,
    RnaGenomeIndex(RnaPass),
    KnownSites,
}

impl ResourceKind {
    /// Every kind, in catalog order
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::AlignerIndex(Aligner::Bwa),
        ResourceKind::AlignerIndex(Aligner::Bowtie2),
        ResourceKind::AlignerIndex(Aligner::Cushaw2),
        ResourceKind::VariantDict,
        ResourceKind::RnaGenomeIndex(RnaPass::First),
        ResourceKind::RnaGenomeIndex(RnaPass::Second),
        ResourceKind::AnnotationFile,
        ResourceKind::KnownSites,
    ];

    /// Stable name used on the command line, in config and in logs
    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::AlignerIndex(Aligner::Bwa) => "bwa-index",
            ResourceKind::AlignerIndex(Aligner::Bowtie2) => "bowtie2-index",
            ResourceKind::AlignerIndex(Aligner::Cushaw2) => "cushaw2-index",
            ResourceKind::AnnotationFile => "annotation",
            ResourceKind::VariantDict => "variant-dict",
            ResourceKind::RnaGenomeIndex(RnaPass::First) => "rna-genome",
            ResourceKind::RnaGenomeIndex(RnaPass::Second) => "rna-genome-pass2",
            ResourceKind::KnownSites => "known-sites",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResourceKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s.trim().to_lowercase().as_str() {
            "bwa-index" | "bwa" => ResourceKind::AlignerIndex(Aligner::Bwa),
            "bowtie2-index" | "bowtie2" => ResourceKind::AlignerIndex(Aligner::Bowtie2),
            "cushaw2-index" | "cushaw2" => ResourceKind::AlignerIndex(Aligner::Cushaw2),
            "annotation" | "gff" => ResourceKind::AnnotationFile,
            "variant-dict" | "gatk" => ResourceKind::VariantDict,
            "rna-genome" | "star" => ResourceKind::RnaGenomeIndex(RnaPass::First),
            "rna-genome-pass2" | "star2" => ResourceKind::RnaGenomeIndex(RnaPass::Second),
            "known-sites" | "dbsnp" => ResourceKind::KnownSites,
            _ => return Err(CacheError::UnknownKind(s.to_string())),
        };
        Ok(kind)
    }
}

impl TryFrom<String> for ResourceKind {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ResourceKind> for String {
    fn from(kind: ResourceKind) -> Self {
        kind.name().to_string()
    }
}

/// How a completed copy is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    /// Byte length must equal the remote length
    #[default]
    Size,
    /// Length plus SHA-256 against the digest the store reports
    Checksum,
}

/// Shape of the local copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Files share a path prefix: `<base><suffix>`
    Prefix,
    /// Files live in one directory: `<base>/<name>`
    Directory,
}

/// Required and optional members of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSet {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

impl FileSet {
    pub fn new(required: &[&str], optional: &[&str]) -> Self {
        Self {
            required: required.iter().map(|s| s.to_string()).collect(),
            optional: optional.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Everything the coordinator needs to know about one kind
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub kind: ResourceKind,
    /// File name of the node lock inside the scratch directory
    pub lock_name: String,
    pub file_set: FileSet,
    /// Empty tag file that lets a later process find this copy
    pub detection_suffix: String,
    /// Stem for newly allocated local bases
    pub base_prefix: String,
    pub layout: Layout,
    pub complete_marker: i32,
    pub verification: Verification,
    /// Search the scratch tree recursively for the detection tag
    pub recursive_search: bool,
}

impl CatalogEntry {
    fn prefixed(
        kind: ResourceKind,
        lock_name: &str,
        detection_suffix: &str,
        required: &[&str],
        complete_marker: i32,
    ) -> Self {
        Self {
            kind,
            lock_name: lock_name.to_string(),
            file_set: FileSet::new(required, &[]),
            detection_suffix: detection_suffix.to_string(),
            base_prefix: detection_suffix.trim_start_matches('.').to_string(),
            layout: Layout::Prefix,
            complete_marker,
            verification: Verification::Size,
            recursive_search: false,
        }
    }
}

const BWA_SUFFIXES: &[&str] = &[
    ".fasta",
    ".fasta.amb",
    ".fasta.ann",
    ".fasta.bwt",
    ".fasta.pac",
    ".fasta.sa",
];

const BOWTIE2_SUFFIXES: &[&str] = &[
    ".fasta",
    ".fasta.1.bt2",
    ".fasta.2.bt2",
    ".fasta.3.bt2",
    ".fasta.4.bt2",
    ".fasta.rev.1.bt2",
    ".fasta.rev.2.bt2",
];

const CUSHAW2_SUFFIXES: &[&str] = &[
    ".fasta",
    ".fasta.amb",
    ".fasta.ann",
    ".fasta.pac",
    ".fasta.rbwt",
    ".fasta.rpac",
    ".fasta.rsa",
];

const GATK_SUFFIXES: &[&str] = &[".fasta", ".fasta.fai", ".dict"];

const STAR_FILES: &[&str] = &[
    "chrLength.txt",
    "chrNameLength.txt",
    "chrName.txt",
    "chrStart.txt",
    "Genome",
    "genomeParameters.txt",
    "SA",
    "SAindex",
];

const STAR_OPTIONAL_FILES: &[&str] = &["sjdbInfo.txt", "sjdbList.out.tab"];

/// Lookup table of catalog entries
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// The built-in catalog covering every [`ResourceKind`]
    pub fn standard() -> Self {
        let star = |pass: RnaPass, lock: &str, tag: &str| CatalogEntry {
            kind: ResourceKind::RnaGenomeIndex(pass),
            lock_name: lock.to_string(),
            file_set: FileSet::new(STAR_FILES, STAR_OPTIONAL_FILES),
            detection_suffix: tag.to_string(),
            base_prefix: tag.trim_start_matches('.').to_string(),
            layout: Layout::Directory,
            complete_marker: DEFAULT_COMPLETE_MARKER,
            verification: Verification::Size,
            recursive_search: true,
        };

        Self::new(vec![
            CatalogEntry::prefixed(
                ResourceKind::AlignerIndex(Aligner::Bwa),
                "down_ref_bwa.lock",
                ".bwa_ref",
                BWA_SUFFIXES,
                REFERENCE_AND_INDEX_MARKER,
            ),
            CatalogEntry::prefixed(
                ResourceKind::AlignerIndex(Aligner::Bowtie2),
                "down_ref_bowtie2.lock",
                ".bowtie2_ref",
                BOWTIE2_SUFFIXES,
                REFERENCE_AND_INDEX_MARKER,
            ),
            CatalogEntry::prefixed(
                ResourceKind::AlignerIndex(Aligner::Cushaw2),
                "down_ref_cushaw2.lock",
                ".cushaw2_ref",
                CUSHAW2_SUFFIXES,
                REFERENCE_AND_INDEX_MARKER,
            ),
            CatalogEntry::prefixed(
                ResourceKind::VariantDict,
                "down_gatk.lock",
                ".gatk_ref",
                GATK_SUFFIXES,
                DEFAULT_COMPLETE_MARKER,
            ),
            star(RnaPass::First, "down_starg.lock", ".star_ref"),
            star(RnaPass::Second, "down_starg2.lock", ".star_ref_p2"),
            CatalogEntry {
                kind: ResourceKind::AnnotationFile,
                lock_name: "down_gff.lock".to_string(),
                file_set: FileSet::new(&[""], &[]),
                detection_suffix: ".gff_ref".to_string(),
                base_prefix: "gff_ref".to_string(),
                layout: Layout::Directory,
                complete_marker: DEFAULT_COMPLETE_MARKER,
                verification: Verification::Size,
                recursive_search: true,
            },
            CatalogEntry {
                kind: ResourceKind::KnownSites,
                lock_name: "down_snpdb.lock".to_string(),
                file_set: FileSet::new(&[""], &[".idx"]),
                detection_suffix: ".dbsnp".to_string(),
                base_prefix: "dbsnp".to_string(),
                layout: Layout::Directory,
                complete_marker: DEFAULT_COMPLETE_MARKER,
                verification: Verification::Size,
                recursive_search: true,
            },
        ])
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn entry(&self, kind: ResourceKind) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    /// Like [`Catalog::entry`] but a missing kind is an error
    pub fn require(&self, kind: ResourceKind) -> Result<&CatalogEntry> {
        self.entry(kind)
            .ok_or_else(|| CacheError::UnknownKind(kind.to_string()))
    }

    /// Switch the verification mode of one kind
    pub fn with_verification(mut self, kind: ResourceKind, verification: Verification) -> Self {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.kind == kind) {
            entry.verification = verification;
        }
        self
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Rewrite the canonical `.fasta` in a catalog suffix to the reference's own extension
///
/// `substitute_suffix(".fasta.bwt", ".fa")` is `".fa.bwt"`. Suffixes without
/// `.fasta` (such as `.dict`) are returned unchanged.
pub fn substitute_suffix(suffix: &str, reference_suffix: &str) -> String {
    match suffix.strip_prefix(FASTA_SUFFIX) {
        Some(rest) => format!("{reference_suffix}{rest}"),
        None => suffix.to_string(),
    }
}

/// Split a reference URI into its base and extension (`.fasta` or `.fa`)
pub fn split_reference(uri: &str) -> Option<(&str, &'static str)> {
    if let Some(base) = uri.strip_suffix(FASTA_SUFFIX) {
        Some((base, FASTA_SUFFIX))
    } else {
        uri.strip_suffix(FA_SUFFIX).map(|base| (base, FA_SUFFIX))
    }
}
