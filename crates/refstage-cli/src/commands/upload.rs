//! `refstage upload` command implementation
//!
//! Pushes a task output to the remote store with the same size checks and
//! retries used for staging.

use crate::config::StageConfig;
use crate::error::{CliError, Result};
use crate::progress::{create_spinner, format_bytes};
use colored::Colorize;
use std::path::Path;

/// Upload `local` to `remote`
pub async fn run(config: &StageConfig, local: &Path, remote: &str) -> Result<()> {
    if !local.is_file() {
        return Err(CliError::FileNotFound(local.display().to_string()));
    }

    let engine = config.engine().await?;
    let spinner = create_spinner(&format!("Uploading {}", local.display()));
    let result = engine.upload(local, remote).await;
    spinner.finish_and_clear();
    let report = result?;

    if report.copied {
        println!(
            "{} Uploaded {} to {} ({}, {} attempt(s))",
            "✓".green(),
            local.display(),
            remote.cyan(),
            format_bytes(report.bytes),
            report.attempts
        );
    } else {
        println!(
            "{} {} already present ({})",
            "✓".green(),
            remote.cyan(),
            format_bytes(report.bytes)
        );
    }
    Ok(())
}
