//! `refstage clean` command implementation
//!
//! Evicts local copies under their node locks, so a copy is never removed
//! while another task is staging it.

use crate::config::StageConfig;
use crate::error::Result;
use crate::progress::format_bytes;
use colored::Colorize;
use refstage_cache::{CacheError, ResourceKind};

/// Evict `kinds`, or every kind when none are named
pub async fn run(config: &StageConfig, kinds: &[String]) -> Result<()> {
    let kinds: Vec<ResourceKind> = if kinds.is_empty() {
        ResourceKind::ALL.to_vec()
    } else {
        kinds
            .iter()
            .map(|name| name.parse())
            .collect::<std::result::Result<_, CacheError>>()?
    };

    if !config.scratch_dir.is_dir() {
        println!("Nothing to clean: {} does not exist", config.scratch_dir.display());
        return Ok(());
    }

    let coordinator = config.local_coordinator();
    let mut total = 0;
    for kind in kinds {
        let freed = coordinator.evict(kind, &config.scratch_dir).await?;
        if freed > 0 {
            println!("{} Evicted {} ({})", "✓".green(), kind, format_bytes(freed));
        }
        total += freed;
    }

    println!("  Freed: {}", format_bytes(total));
    Ok(())
}
