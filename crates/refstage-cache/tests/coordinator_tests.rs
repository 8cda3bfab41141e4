//! End-to-end behaviour of the cache coordinator against an in-memory store

mod common;

use common::{coordinator, seed_variant_dict, FakeStore};
use refstage_cache::lock::peek_marker;
use refstage_cache::{
    Aligner, CacheError, ResolveOrigin, ResourceKind, ResourceSource, ResourceSources, RnaPass,
};
use std::path::Path;
use tempfile::TempDir;

fn dict_sources() -> ResourceSources {
    ResourceSources::new().with(
        ResourceKind::VariantDict,
        ResourceSource::reference("s3://refs/hg38.fa").unwrap(),
    )
}

fn len(path: &Path) -> u64 {
    std::fs::metadata(path).unwrap().len()
}

#[tokio::test]
async fn test_first_resolve_stages_every_file() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    seed_variant_dict(&store);
    let coordinator = coordinator(store.clone(), dict_sources());

    let resolved = coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap();

    assert_eq!(resolved.origin, ResolveOrigin::Staged);
    assert_eq!(resolved.files_copied, 3);
    assert_eq!(store.total_copies(), 3);
    assert_eq!(resolved.files.len(), 3);

    assert!(resolved.primary.to_string_lossy().ends_with(".fasta"));
    assert_eq!(len(&resolved.primary), 100);
    let fai = resolved
        .files
        .iter()
        .find(|f| f.to_string_lossy().ends_with(".fasta.fai"))
        .unwrap();
    assert_eq!(len(fai), 10);
    let dict = resolved
        .files
        .iter()
        .find(|f| f.to_string_lossy().ends_with(".dict"))
        .unwrap();
    assert_eq!(len(dict), 20);

    assert_eq!(
        peek_marker(&scratch.path().join("down_gatk.lock")).unwrap(),
        Some(1)
    );
}

#[tokio::test]
async fn test_second_resolve_is_a_cache_hit() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    seed_variant_dict(&store);
    let coordinator = coordinator(store.clone(), dict_sources());

    let first = coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap();
    let length_calls = store.length_calls();

    let second = coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap();

    assert_eq!(second.origin, ResolveOrigin::CacheHit);
    assert_eq!(second.files_copied, 0);
    assert_eq!(second.primary, first.primary);
    assert_eq!(store.total_copies(), 3);
    assert_eq!(store.length_calls(), length_calls);
}

#[tokio::test]
async fn test_crash_before_marker_recovers_without_recopying() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    seed_variant_dict(&store);
    let coordinator = coordinator(store.clone(), dict_sources());

    coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap();

    // A process that died after copying but before writing the marker
    std::fs::write(scratch.path().join("down_gatk.lock"), b"").unwrap();

    let recovered = coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap();
    assert_eq!(recovered.origin, ResolveOrigin::Staged);
    assert_eq!(recovered.files_copied, 0);
    assert_eq!(store.total_copies(), 3);
    assert_eq!(
        peek_marker(&scratch.path().join("down_gatk.lock")).unwrap(),
        Some(1)
    );
}

#[tokio::test]
async fn test_partial_copy_refetches_only_damaged_file() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    seed_variant_dict(&store);
    let coordinator = coordinator(store.clone(), dict_sources());

    let resolved = coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap();
    let dict = resolved
        .files
        .iter()
        .find(|f| f.to_string_lossy().ends_with(".dict"))
        .unwrap()
        .clone();

    std::fs::write(&dict, b"truncated").unwrap();
    std::fs::write(scratch.path().join("down_gatk.lock"), b"").unwrap();

    coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap();
    assert_eq!(len(&dict), 20);
    assert_eq!(store.copies_of("s3://refs/hg38.dict"), 2);
    assert_eq!(store.copies_of("s3://refs/hg38.fa"), 1);
}

#[tokio::test]
async fn test_marker_with_missing_files_reverifies() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    seed_variant_dict(&store);
    let coordinator = coordinator(store.clone(), dict_sources());

    let resolved = coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap();
    std::fs::remove_file(&resolved.primary).unwrap();

    let again = coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap();
    assert_eq!(again.origin, ResolveOrigin::Staged);
    assert_eq!(again.files_copied, 1);
    assert_eq!(len(&again.primary), 100);
}

#[tokio::test]
async fn test_size_mismatch_is_retried() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    seed_variant_dict(&store);
    store.corrupt_next("s3://refs/hg38.dict", 1);
    let coordinator = coordinator(store.clone(), dict_sources());

    let resolved = coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap();
    assert_eq!(store.copies_of("s3://refs/hg38.dict"), 2);
    assert!(resolved
        .files
        .iter()
        .filter(|f| f.to_string_lossy().ends_with(".dict"))
        .all(|f| len(f) == 20));
}

#[tokio::test]
async fn test_persistent_corruption_fails_without_marker() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    seed_variant_dict(&store);
    store.corrupt_next("s3://refs/hg38.fa.fai", u32::MAX);
    let coordinator = coordinator(store.clone(), dict_sources());

    let err = coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CacheError::ResourceCorrupt {
            kind: ResourceKind::VariantDict,
            ..
        }
    ));
    assert_eq!(store.copies_of("s3://refs/hg38.fa.fai"), 3);
    assert_eq!(
        peek_marker(&scratch.path().join("down_gatk.lock")).unwrap(),
        None
    );

    // The lock was released: a later resolve can proceed once the store heals
    store.corrupt_next("s3://refs/hg38.fa.fai", 0);
    let resolved = coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap();
    assert_eq!(resolved.files.len(), 3);
}

#[tokio::test]
async fn test_missing_remote_file_is_unavailable() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    seed_variant_dict(&store);
    store.remove("s3://refs/hg38.dict");
    let coordinator = coordinator(store.clone(), dict_sources());

    let err = coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::ResourceUnavailable { .. }));
    assert!(err.to_string().contains("hg38.dict"));
    assert_eq!(
        peek_marker(&scratch.path().join("down_gatk.lock")).unwrap(),
        None
    );
}

#[tokio::test]
async fn test_unreachable_store_is_unavailable() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    seed_variant_dict(&store);
    store.set_unreachable(true);
    let coordinator = coordinator(store.clone(), dict_sources());

    let err = coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::ResourceUnavailable { .. }));
    assert_eq!(store.total_copies(), 0);
}

#[tokio::test]
async fn test_store_dropping_copies_is_unavailable_and_not_retried() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    store.put("s3://refs/genes.gtf", 30);
    store.set_copies_unreachable(true);
    let sources = ResourceSources::new().with(
        ResourceKind::AnnotationFile,
        ResourceSource::files(vec!["s3://refs/genes.gtf".to_string()]),
    );
    let coordinator = coordinator(store.clone(), sources);

    let err = coordinator
        .resolve(ResourceKind::AnnotationFile, scratch.path())
        .await
        .unwrap_err();
    match &err {
        CacheError::ResourceUnavailable { detail, .. } => {
            assert!(detail.contains("connection refused"));
        }
        other => panic!("expected ResourceUnavailable, got {other:?}"),
    }
    assert_eq!(store.copy_attempts(), 1);
    assert_eq!(store.total_copies(), 0);
    assert_eq!(
        peek_marker(&scratch.path().join("down_gff.lock")).unwrap(),
        None
    );

    // The store comes back and the next resolve stages normally
    store.set_copies_unreachable(false);
    let resolved = coordinator
        .resolve(ResourceKind::AnnotationFile, scratch.path())
        .await
        .unwrap();
    assert_eq!(resolved.origin, ResolveOrigin::Staged);
    assert_eq!(len(&resolved.primary), 30);
}

#[tokio::test]
async fn test_aligner_index_uses_reference_marker() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    for suffix in [".fa", ".fa.amb", ".fa.ann", ".fa.bwt", ".fa.pac", ".fa.sa"] {
        store.put(&format!("s3://refs/hg38{suffix}"), 8);
    }
    let sources = ResourceSources::new().with(
        ResourceKind::AlignerIndex(Aligner::Bwa),
        ResourceSource::reference("s3://refs/hg38.fa").unwrap(),
    );
    let coordinator = coordinator(store.clone(), sources);

    let resolved = coordinator
        .resolve(ResourceKind::AlignerIndex(Aligner::Bwa), scratch.path())
        .await
        .unwrap();
    assert_eq!(resolved.files.len(), 6);
    assert_eq!(
        peek_marker(&scratch.path().join("down_ref_bwa.lock")).unwrap(),
        Some(2)
    );
}

#[tokio::test]
async fn test_rna_genome_optional_files() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    for name in [
        "chrLength.txt",
        "chrNameLength.txt",
        "chrName.txt",
        "chrStart.txt",
        "Genome",
        "genomeParameters.txt",
        "SA",
        "SAindex",
        "sjdbInfo.txt",
    ] {
        store.put(&format!("s3://refs/star/{name}"), 4);
    }
    let sources = ResourceSources::new().with(
        ResourceKind::RnaGenomeIndex(RnaPass::First),
        ResourceSource::directory("s3://refs/star"),
    );
    let coordinator = coordinator(store.clone(), sources);

    let resolved = coordinator
        .resolve(ResourceKind::RnaGenomeIndex(RnaPass::First), scratch.path())
        .await
        .unwrap();
    assert!(resolved.primary.is_dir());
    assert_eq!(resolved.primary, resolved.base);
    assert_eq!(resolved.files.len(), 9);
    assert!(resolved.primary.join("sjdbInfo.txt").is_file());
    assert!(!resolved.primary.join("sjdbList.out.tab").exists());
}

#[tokio::test]
async fn test_known_sites_keep_file_names() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    store.put("s3://refs/dbsnp_138.vcf", 30);
    store.put("s3://refs/dbsnp_138.vcf.idx", 6);
    store.put("s3://refs/mills.vcf", 12);
    let sources = ResourceSources::new().with(
        ResourceKind::KnownSites,
        ResourceSource::files(vec![
            "s3://refs/dbsnp_138.vcf".to_string(),
            "s3://refs/mills.vcf".to_string(),
        ]),
    );
    let coordinator = coordinator(store.clone(), sources);

    let resolved = coordinator
        .resolve(ResourceKind::KnownSites, scratch.path())
        .await
        .unwrap();
    let names: Vec<_> = resolved
        .files
        .iter()
        .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["dbsnp_138.vcf", "dbsnp_138.vcf.idx", "mills.vcf"]);
    assert_eq!(
        resolved.primary.file_name().unwrap().to_string_lossy(),
        "dbsnp_138.vcf"
    );
}

#[tokio::test]
async fn test_known_sites_with_colliding_file_names_are_rejected() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    store.put("s3://a/dbsnp.vcf", 10);
    store.put("s3://b/dbsnp.vcf", 20);
    let sources = ResourceSources::new().with(
        ResourceKind::KnownSites,
        ResourceSource::files(vec![
            "s3://a/dbsnp.vcf".to_string(),
            "s3://b/dbsnp.vcf".to_string(),
        ]),
    );
    let coordinator = coordinator(store.clone(), sources);

    let err = coordinator
        .resolve(ResourceKind::KnownSites, scratch.path())
        .await
        .unwrap_err();
    match &err {
        CacheError::InvalidSource { detail, .. } => {
            assert!(detail.contains("s3://b/dbsnp.vcf"));
            assert!(detail.contains("'dbsnp.vcf'"));
        }
        other => panic!("expected InvalidSource, got {other:?}"),
    }
    assert_eq!(store.total_copies(), 0);
    assert_eq!(
        peek_marker(&scratch.path().join("down_snpdb.lock")).unwrap(),
        None
    );

    // Nothing was marked complete, so a retry fails the same way
    let again = coordinator
        .resolve(ResourceKind::KnownSites, scratch.path())
        .await
        .unwrap_err();
    assert!(matches!(again, CacheError::InvalidSource { .. }));
}

#[tokio::test]
async fn test_kinds_are_staged_independently() {
    let scratch = TempDir::new().unwrap();
    let store = FakeStore::new();
    seed_variant_dict(&store);
    store.put("s3://refs/genes.gtf", 50);
    let sources = dict_sources().with(
        ResourceKind::AnnotationFile,
        ResourceSource::files(vec!["s3://refs/genes.gtf".to_string()]),
    );
    let coordinator = coordinator(store.clone(), sources);

    let resolved = coordinator
        .resolve_all(
            &[ResourceKind::VariantDict, ResourceKind::AnnotationFile],
            scratch.path(),
        )
        .await
        .unwrap();
    assert_eq!(resolved.len(), 2);
    assert_ne!(resolved[0].base, resolved[1].base);
    assert_eq!(
        peek_marker(&scratch.path().join("down_gff.lock")).unwrap(),
        Some(1)
    );

    coordinator
        .evict(ResourceKind::AnnotationFile, scratch.path())
        .await
        .unwrap();
    let dict = coordinator
        .resolve(ResourceKind::VariantDict, scratch.path())
        .await
        .unwrap();
    assert_eq!(dict.origin, ResolveOrigin::CacheHit);
}
