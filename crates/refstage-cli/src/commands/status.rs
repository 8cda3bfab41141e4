//! `refstage status` command implementation
//!
//! Shows completion markers and local copies without taking any lock.

use crate::config::StageConfig;
use crate::error::Result;
use crate::progress::format_bytes;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use refstage_cache::ResourceStatus;

/// Show cache state for every catalog kind
pub fn run(config: &StageConfig, json: bool) -> Result<()> {
    let statuses = config.local_coordinator().status(&config.scratch_dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    println!("{}", "Reference Cache:".cyan().bold());
    println!("  Scratch dir: {}", config.scratch_dir.display());
    println!();
    println!("{}", render_table(&statuses));

    let complete = statuses.iter().filter(|s| s.complete).count();
    let total_bytes: u64 = statuses.iter().map(|s| s.local_bytes).sum();
    println!();
    println!("{}", "Summary:".cyan().bold());
    println!("  Complete:   {}/{}", complete, statuses.len());
    println!("  Local size: {}", format_bytes(total_bytes));

    Ok(())
}

fn render_table(statuses: &[ResourceStatus]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Kind", "State", "Marker", "Size", "Location"]);

    for status in statuses {
        let state = match (status.complete, status.marker) {
            (true, _) => "complete",
            (false, Some(_)) => "stale",
            (false, None) if status.base.is_some() => "partial",
            (false, None) => "-",
        };
        let marker = status
            .marker
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".to_string());
        let location = status
            .base
            .as_ref()
            .map(|b| b.display().to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            status.kind.to_string(),
            state.to_string(),
            marker,
            format_bytes(status.local_bytes),
            location,
        ]);
    }
    table
}
