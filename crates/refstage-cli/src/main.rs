//! Refstage CLI - Main entry point

use clap::Parser;
use refstage_cli::Cli;
use refstage_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // .env is optional; a missing file is not an error
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    let Some(command) = cli.command.as_ref() else {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    };

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        })
        .output(LogOutput::Console)
        .log_file_prefix("refstage")
        .build();

    // REFSTAGE_LOG_* variables take precedence over the flags
    let log_config = match log_config.clone().merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: ignoring logging environment: {e}");
            log_config
        }
    };
    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e}");
            None
        }
    };

    if let Err(e) = refstage_cli::execute(&cli, command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}
