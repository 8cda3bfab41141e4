//! `refstage config` command implementation

use crate::config::StageConfig;
use crate::error::Result;
use std::path::Path;

const REDACTED: &str = "********";

/// Print the effective configuration as TOML, secrets redacted
pub fn show(config: &StageConfig) -> Result<()> {
    print!("{}", render(config)?);
    Ok(())
}

/// Print the configuration file in use
pub fn path(config_path: Option<&Path>) -> Result<()> {
    match config_path {
        Some(path) => println!("{}", path.display()),
        None => println!("(none: defaults and REFSTAGE_* environment variables)"),
    }
    Ok(())
}

fn render(config: &StageConfig) -> Result<String> {
    let mut shown = config.clone();
    if shown.storage.secret_key.is_some() {
        shown.storage.secret_key = Some(REDACTED.to_string());
    }
    Ok(toml::to_string_pretty(&shown)?)
}
