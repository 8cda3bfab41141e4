//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod catalog;
pub mod clean;
pub mod config;
pub mod preflight;
pub mod resolve;
pub mod status;
pub mod upload;
