//! Mapping between remote sources and local copies
//!
//! A local copy lives under a *base*: a path prefix for [`Layout::Prefix`]
//! kinds (`<scratch>/bwa_ref-1a2b3c4d` + `.fasta.bwt`) or a directory for
//! [`Layout::Directory`] kinds. Every base carries an empty detection tag so a
//! later process can find it again by scanning the scratch directory.

use crate::catalog::{substitute_suffix, CatalogEntry, Layout, FASTA_SUFFIX};
use crate::error::{CacheError, Result};
use crate::pipeline::ResourceSource;
use crate::scratch;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Root of one local copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBase {
    path: PathBuf,
    layout: Layout,
}

impl LocalBase {
    pub fn new(path: impl Into<PathBuf>, layout: Layout) -> Self {
        Self {
            path: path.into(),
            layout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Local path of a member: `<base><suffix>` or `<base>/<name>`
    pub fn member(&self, name: &str) -> PathBuf {
        match self.layout {
            Layout::Prefix => {
                let mut joined: OsString = self.path.clone().into_os_string();
                joined.push(name);
                PathBuf::from(joined)
            }
            Layout::Directory => self.path.join(name),
        }
    }

    pub fn tag_path(&self, entry: &CatalogEntry) -> PathBuf {
        self.member(&entry.detection_suffix)
    }

    /// Delete every file belonging to this base and return the bytes freed
    pub fn remove(&self) -> io::Result<u64> {
        match self.layout {
            Layout::Directory => scratch::remove_local_dir(&self.path, false),
            Layout::Prefix => {
                let (Some(parent), Some(stem)) = (self.path.parent(), self.path.file_name())
                else {
                    return Ok(0);
                };
                let stem = stem.to_string_lossy().into_owned();
                let mut freed = 0;
                for entry in fs::read_dir(parent)? {
                    let entry = entry?;
                    if is_prefix_member(&entry.file_name().to_string_lossy(), &stem) {
                        freed += scratch::remove_local_file(&entry.path(), false)?;
                    }
                }
                Ok(freed)
            }
        }
    }
}

/// Whether `name` is a file of the prefix base `stem`
///
/// Every prefix member is the stem plus a dot suffix, so `bwa_ref-1a2b3c4d`
/// owns `bwa_ref-1a2b3c4d.fasta.bwt` but not `bwa_ref-1a2b3c4dff.fasta`.
pub(crate) fn is_prefix_member(name: &str, stem: &str) -> bool {
    name.strip_prefix(stem)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

/// One file of a resource, remote and local side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub remote: String,
    pub local: PathBuf,
    pub required: bool,
}

/// Remote locations of every member, each flagged required or optional
pub fn remote_files(entry: &CatalogEntry, source: &ResourceSource) -> Result<Vec<(String, bool)>> {
    Ok(members(entry, source)?
        .into_iter()
        .map(|m| (m.remote, m.required))
        .collect())
}

/// Pair every member's remote location with its path under `base`
pub fn plan_files(
    entry: &CatalogEntry,
    source: &ResourceSource,
    base: &LocalBase,
) -> Result<Vec<PlannedFile>> {
    Ok(members(entry, source)?
        .into_iter()
        .map(|m| PlannedFile {
            remote: m.remote,
            local: base.member(&m.local_name),
            required: m.required,
        })
        .collect())
}

/// Whether every required planned file exists locally
pub fn required_present(plan: &[PlannedFile]) -> bool {
    plan.iter().filter(|f| f.required).all(|f| f.local.is_file())
}

struct Member {
    remote: String,
    local_name: String,
    required: bool,
}

fn members(entry: &CatalogEntry, source: &ResourceSource) -> Result<Vec<Member>> {
    let set = &entry.file_set;
    let flagged = || {
        set.required
            .iter()
            .map(|s| (s.as_str(), true))
            .chain(set.optional.iter().map(|s| (s.as_str(), false)))
    };

    let members = match (entry.layout, source) {
        (Layout::Prefix, ResourceSource::Reference { base, suffix }) => flagged()
            .map(|(s, required)| Member {
                remote: format!("{base}{}", substitute_suffix(s, suffix)),
                local_name: s.to_string(),
                required,
            })
            .collect(),
        (Layout::Directory, ResourceSource::Directory { dir }) => flagged()
            .map(|(name, required)| Member {
                remote: format!("{dir}{name}"),
                local_name: name.to_string(),
                required,
            })
            .collect(),
        (Layout::Directory, ResourceSource::Files { uris }) => {
            let mut members = Vec::new();
            let mut staged_as: HashMap<String, &str> = HashMap::new();
            for uri in uris {
                let file_name = file_name(uri)
                    .ok_or_else(|| CacheError::invalid_source(entry.kind, format!("'{uri}' names no file")))?;
                for (s, required) in flagged() {
                    let local_name = format!("{file_name}{s}");
                    if let Some(first) = staged_as.insert(local_name.clone(), uri) {
                        return Err(CacheError::invalid_source(
                            entry.kind,
                            format!("'{first}' and '{uri}' would both be staged as '{local_name}'"),
                        ));
                    }
                    members.push(Member {
                        remote: format!("{uri}{s}"),
                        local_name,
                        required,
                    });
                }
            }
            members
        }
        (_, other) => {
            return Err(CacheError::invalid_source(
                entry.kind,
                format!("{} cannot be staged from {}", entry.kind, other.describe()),
            ))
        }
    };
    Ok(members)
}

fn file_name(uri: &str) -> Option<&str> {
    uri.rsplit('/').next().filter(|name| !name.is_empty())
}

/// Path of the file consumers open first: the reference FASTA, the RNA genome
/// directory, or the first named file
pub fn primary_path(entry: &CatalogEntry, base: &LocalBase, plan: &[PlannedFile]) -> PathBuf {
    match entry.layout {
        Layout::Prefix => base.member(FASTA_SUFFIX),
        Layout::Directory if entry.file_set.required.iter().any(|s| s.is_empty()) => plan
            .first()
            .map(|f| f.local.clone())
            .unwrap_or_else(|| base.path().to_path_buf()),
        Layout::Directory => base.path().to_path_buf(),
    }
}

/// Find an existing base by its detection tag
///
/// Entries are visited in file-name order so every process on a node settles
/// on the same base when several exist.
pub fn find_existing(scratch_dir: &Path, entry: &CatalogEntry) -> Option<LocalBase> {
    let max_depth = if entry.recursive_search { usize::MAX } else { 1 };
    WalkDir::new(scratch_dir)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .find_map(|e| base_from_tag(e.path(), entry))
}

fn base_from_tag(tag: &Path, entry: &CatalogEntry) -> Option<LocalBase> {
    let name = tag.file_name()?.to_str()?;
    match entry.layout {
        Layout::Directory if name == entry.detection_suffix => {
            Some(LocalBase::new(tag.parent()?, Layout::Directory))
        }
        Layout::Prefix if name.len() > entry.detection_suffix.len() => {
            let stem = name.strip_suffix(entry.detection_suffix.as_str())?;
            Some(LocalBase::new(tag.with_file_name(stem), Layout::Prefix))
        }
        _ => None,
    }
}

/// Create a fresh base under the scratch directory and tag it immediately
pub fn allocate(scratch_dir: &Path, entry: &CatalogEntry) -> Result<LocalBase> {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let name = format!("{}-{}", entry.base_prefix, &id[..8]);
    let base = LocalBase::new(scratch_dir.join(name), entry.layout);

    if entry.layout == Layout::Directory {
        fs::create_dir_all(base.path())?;
    } else {
        fs::create_dir_all(scratch_dir)?;
    }
    fs::File::create(base.tag_path(entry))?;

    debug!(kind = %entry.kind, base = %base.path().display(), "allocated local base");
    Ok(base)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::{Aligner, Catalog, ResourceKind, RnaPass};
    use tempfile::TempDir;

    fn entry(kind: ResourceKind) -> CatalogEntry {
        Catalog::standard().require(kind).unwrap().clone()
    }

    #[test]
    fn test_prefix_plan_substitutes_remote_suffix_only() {
        let gatk = entry(ResourceKind::VariantDict);
        let source = ResourceSource::reference("s3://refs/hg19.fa").unwrap();
        let base = LocalBase::new("/scratch/gatk_ref-0001", Layout::Prefix);

        let plan = plan_files(&gatk, &source, &base).unwrap();
        let remotes: Vec<_> = plan.iter().map(|f| f.remote.as_str()).collect();
        assert_eq!(
            remotes,
            vec!["s3://refs/hg19.fa", "s3://refs/hg19.fa.fai", "s3://refs/hg19.dict"]
        );
        assert_eq!(plan[1].local, PathBuf::from("/scratch/gatk_ref-0001.fasta.fai"));
        assert!(plan.iter().all(|f| f.required));
        assert_eq!(
            primary_path(&gatk, &base, &plan),
            PathBuf::from("/scratch/gatk_ref-0001.fasta")
        );
    }

    #[test]
    fn test_directory_plan_marks_optional_files() {
        let star = entry(ResourceKind::RnaGenomeIndex(RnaPass::First));
        let source = ResourceSource::directory("s3://refs/star");
        let base = LocalBase::new("/scratch/star_ref-0001", Layout::Directory);

        let plan = plan_files(&star, &source, &base).unwrap();
        let sjdb = plan.iter().find(|f| f.remote.ends_with("sjdbInfo.txt")).unwrap();
        assert!(!sjdb.required);
        assert_eq!(sjdb.remote, "s3://refs/star/sjdbInfo.txt");
        assert_eq!(sjdb.local, PathBuf::from("/scratch/star_ref-0001/sjdbInfo.txt"));
        assert_eq!(plan.iter().filter(|f| f.required).count(), 8);
    }

    #[test]
    fn test_files_plan_keeps_names_and_optional_index() {
        let sites = entry(ResourceKind::KnownSites);
        let source = ResourceSource::files(vec![
            "s3://refs/dbsnp_138.vcf".to_string(),
            "s3://refs/mills.vcf".to_string(),
        ]);
        let base = LocalBase::new("/scratch/dbsnp-0001", Layout::Directory);

        let plan = plan_files(&sites, &source, &base).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0].local, PathBuf::from("/scratch/dbsnp-0001/dbsnp_138.vcf"));
        assert_eq!(plan[1].remote, "s3://refs/dbsnp_138.vcf.idx");
        assert!(!plan[1].required);
        assert_eq!(
            primary_path(&sites, &base, &plan),
            PathBuf::from("/scratch/dbsnp-0001/dbsnp_138.vcf")
        );
    }

    #[test]
    fn test_files_sharing_a_name_are_invalid() {
        let sites = entry(ResourceKind::KnownSites);
        let source = ResourceSource::files(vec![
            "s3://a/dbsnp.vcf".to_string(),
            "s3://b/dbsnp.vcf".to_string(),
        ]);
        let base = LocalBase::new("/scratch/dbsnp-0001", Layout::Directory);

        let err = plan_files(&sites, &source, &base).unwrap_err();
        assert!(matches!(err, CacheError::InvalidSource { .. }));
        let message = err.to_string();
        assert!(message.contains("s3://a/dbsnp.vcf"));
        assert!(message.contains("s3://b/dbsnp.vcf"));
        assert!(remote_files(&sites, &source).is_err());
    }

    #[test]
    fn test_mismatched_source_is_invalid() {
        let bwa = entry(ResourceKind::AlignerIndex(Aligner::Bwa));
        let source = ResourceSource::directory("s3://refs/star");
        let base = LocalBase::new("/scratch/x", Layout::Prefix);
        assert!(matches!(
            plan_files(&bwa, &source, &base),
            Err(CacheError::InvalidSource { .. })
        ));
    }

    #[test]
    fn test_allocate_then_find_existing() {
        let dir = TempDir::new().unwrap();
        let gatk = entry(ResourceKind::VariantDict);
        assert!(find_existing(dir.path(), &gatk).is_none());

        let base = allocate(dir.path(), &gatk).unwrap();
        assert!(base.tag_path(&gatk).is_file());
        assert_eq!(find_existing(dir.path(), &gatk), Some(base));

        let bwa = entry(ResourceKind::AlignerIndex(Aligner::Bwa));
        assert!(find_existing(dir.path(), &bwa).is_none());
    }

    #[test]
    fn test_find_existing_prefers_first_by_name() {
        let dir = TempDir::new().unwrap();
        let gatk = entry(ResourceKind::VariantDict);
        std::fs::write(dir.path().join("gatk_ref-bbbb.gatk_ref"), b"").unwrap();
        std::fs::write(dir.path().join("gatk_ref-aaaa.gatk_ref"), b"").unwrap();

        let found = find_existing(dir.path(), &gatk).unwrap();
        assert_eq!(found.path(), dir.path().join("gatk_ref-aaaa"));
    }

    #[test]
    fn test_directory_tag_found_recursively() {
        let dir = TempDir::new().unwrap();
        let star = entry(ResourceKind::RnaGenomeIndex(RnaPass::First));
        let base = allocate(dir.path(), &star).unwrap();
        assert!(base.path().is_dir());

        let pass2 = entry(ResourceKind::RnaGenomeIndex(RnaPass::Second));
        assert_eq!(find_existing(dir.path(), &star), Some(base));
        assert!(find_existing(dir.path(), &pass2).is_none());
    }

    #[test]
    fn test_remove_prefix_base() {
        let dir = TempDir::new().unwrap();
        let gatk = entry(ResourceKind::VariantDict);
        let base = allocate(dir.path(), &gatk).unwrap();
        std::fs::write(base.member(".fasta"), vec![0u8; 100]).unwrap();
        std::fs::write(base.member(".dict"), vec![0u8; 20]).unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"keep").unwrap();

        assert_eq!(base.remove().unwrap(), 120);
        assert!(find_existing(dir.path(), &gatk).is_none());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_remove_prefix_base_spares_longer_stem() {
        let dir = TempDir::new().unwrap();
        let base = LocalBase::new(dir.path().join("gatk_ref-aaaa"), Layout::Prefix);
        let neighbour = LocalBase::new(dir.path().join("gatk_ref-aaaab"), Layout::Prefix);
        for b in [&base, &neighbour] {
            std::fs::write(b.member(".fasta"), vec![0u8; 100]).unwrap();
            std::fs::write(b.member(".dict"), vec![0u8; 20]).unwrap();
            std::fs::write(b.member(".gatk_ref"), b"").unwrap();
        }
        std::fs::write(base.member(".fasta.partial"), vec![0u8; 5]).unwrap();

        assert_eq!(base.remove().unwrap(), 125);
        assert!(!base.member(".gatk_ref").exists());
        assert!(!base.member(".fasta.partial").exists());
        assert_eq!(std::fs::metadata(neighbour.member(".fasta")).unwrap().len(), 100);
        assert!(neighbour.member(".dict").exists());
        assert!(neighbour.member(".gatk_ref").exists());
    }

    #[test]
    fn test_prefix_membership() {
        assert!(is_prefix_member("gatk_ref-aaaa.fasta", "gatk_ref-aaaa"));
        assert!(is_prefix_member("gatk_ref-aaaa.fasta.partial", "gatk_ref-aaaa"));
        assert!(is_prefix_member("gatk_ref-aaaa", "gatk_ref-aaaa"));
        assert!(!is_prefix_member("gatk_ref-aaaab.fasta", "gatk_ref-aaaa"));
        assert!(!is_prefix_member("gatk_ref-aaa.fasta", "gatk_ref-aaaa"));
    }
}
