//! `refstage resolve` command implementation
//!
//! Stages resources under the node lock and prints their local paths, one
//! primary path per line on stdout (or JSON with `--json`).

use crate::config::StageConfig;
use crate::error::{CliError, Result};
use crate::progress::create_spinner;
use refstage_cache::{scratch, CacheError, ResolvedResource, ResourceKind};
use std::path::Path;

/// Resolve `kinds` (or the whole pipeline with `all`)
pub async fn run(
    config: &StageConfig,
    kinds: &[String],
    all: bool,
    json: bool,
    gunzip_into: Option<&Path>,
) -> Result<()> {
    let kinds = selected_kinds(config, kinds, all)?;
    let coordinator = config.coordinator().await?;

    let mut resolved = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let spinner = create_spinner(&format!("Staging {kind}"));
        let result = coordinator.resolve(kind, &config.scratch_dir).await;
        spinner.finish_and_clear();

        let mut resource = result?;
        if let Some(dir) = gunzip_into {
            expand(&mut resource, dir)?;
        }
        resolved.push(resource);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        for resource in &resolved {
            println!("{}", resource.primary.display());
        }
    }
    Ok(())
}

fn selected_kinds(config: &StageConfig, names: &[String], all: bool) -> Result<Vec<ResourceKind>> {
    if all {
        return Ok(config.pipeline.required_kinds());
    }
    if names.is_empty() {
        return Err(CliError::config(
            "name at least one resource kind or pass --all",
        ));
    }
    let kinds = names
        .iter()
        .map(|name| name.parse())
        .collect::<std::result::Result<Vec<ResourceKind>, CacheError>>()?;
    Ok(kinds)
}

/// Replace gzip members with decompressed copies in `dir`
fn expand(resource: &mut ResolvedResource, dir: &Path) -> Result<()> {
    let primary_index = resource.files.iter().position(|f| *f == resource.primary);
    resource.files = resource
        .files
        .iter()
        .map(|file| scratch::gunzip_into(file, dir))
        .collect::<std::io::Result<_>>()?;
    if let Some(index) = primary_index {
        resource.primary = resource.files[index].clone();
    }
    Ok(())
}
