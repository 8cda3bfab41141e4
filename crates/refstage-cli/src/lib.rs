//! Refstage CLI Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Command-line front end for staging reference data on worker nodes.
//!
//! # Overview
//!
//! - **Preflight**: check the remote store before a job starts (`refstage preflight`)
//! - **Resolve**: stage resources and print local paths (`refstage resolve`)
//! - **Status**: inspect markers and local copies (`refstage status`)
//! - **Upload**: push task output with verification (`refstage upload`)
//! - **Clean**: evict local copies under their locks (`refstage clean`)
//! - **Catalog**: list resource kinds and their files (`refstage catalog`)
//! - **Configuration**: show the effective settings (`refstage config show`)

pub mod commands;
pub mod config;
pub mod error;
pub mod progress;

pub use config::StageConfig;
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Refstage - reference data cache coordinator for genomics workers
#[derive(Parser, Debug)]
#[command(name = "refstage")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (TOML)
    #[arg(short, long, env = "REFSTAGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Node-local scratch directory, overriding the configured one
    #[arg(long, global = true)]
    pub scratch_dir: Option<PathBuf>,

    /// Print the command reference as markdown
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that every remote file the pipeline needs exists
    Preflight {
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stage resources locally and print their paths
    Resolve {
        /// Resource kinds (e.g. variant-dict, bwa-index, known-sites)
        kinds: Vec<String>,

        /// Resolve every kind the configured pipeline needs
        #[arg(short, long, conflicts_with = "kinds")]
        all: bool,

        /// Emit resolved resources as JSON
        #[arg(long)]
        json: bool,

        /// Decompress gzip members into this task-private directory
        #[arg(long)]
        gunzip_into: Option<PathBuf>,
    },

    /// Show completion markers and local copies per resource kind
    Status {
        /// Emit status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Upload a local file to the remote store with verification
    Upload {
        /// Local file
        local: PathBuf,

        /// Remote location (path, file:// or s3://bucket/key)
        remote: String,
    },

    /// Remove local copies and their completion markers
    Clean {
        /// Kinds to evict (defaults to every kind)
        #[arg(short, long = "kind")]
        kinds: Vec<String>,
    },

    /// List resource kinds and the files that make them up
    Catalog,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration as TOML
    Show,

    /// Print the configuration file path in use
    Path,
}

/// Execute the CLI command
pub async fn execute(cli: &Cli, command: &Commands) -> Result<()> {
    let load = || {
        StageConfig::load(cli.config.as_deref())
            .map(|config| config.with_scratch_dir(cli.scratch_dir.clone()))
    };

    match command {
        Commands::Preflight { json } => commands::preflight::run(&load()?, *json).await,
        Commands::Resolve {
            kinds,
            all,
            json,
            gunzip_into,
        } => {
            commands::resolve::run(&load()?, kinds, *all, *json, gunzip_into.as_deref()).await
        }
        Commands::Status { json } => commands::status::run(&load()?, *json),
        Commands::Upload { local, remote } => {
            commands::upload::run(&load()?, local, remote).await
        }
        Commands::Clean { kinds } => commands::clean::run(&load()?, kinds).await,
        Commands::Catalog => commands::catalog::run(),
        Commands::Config { command } => match command {
            ConfigCommand::Show => commands::config::show(&load()?),
            ConfigCommand::Path => commands::config::path(cli.config.as_deref()),
        },
    }
}
