//! `refstage preflight` command implementation
//!
//! Checks the remote store for every file the configured pipeline needs.

use crate::config::StageConfig;
use crate::error::Result;
use crate::progress::create_spinner;
use colored::Colorize;

/// Validate the pipeline's remote files
pub async fn run(config: &StageConfig, json: bool) -> Result<()> {
    let validator = config.preflight().await?;
    let kinds = config.pipeline.required_kinds();
    let sources = config.pipeline.sources()?;

    let spinner = create_spinner("Checking remote reference files");
    let report = validator.check(&kinds, &sources).await;
    spinner.finish_and_clear();
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_ok() {
        println!(
            "{} {} remote file(s) present for {} resource kind(s)",
            "✓".green(),
            report.checked,
            kinds.len()
        );
    } else {
        println!("{}", "Missing remote files:".red().bold());
        for missing in &report.missing {
            println!("  {} {}", "✗".red(), missing);
        }
    }

    report.into_result()?;
    Ok(())
}
