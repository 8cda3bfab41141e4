//! Refstage Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the refstage workspace members:
//!
//! - **Error Handling**: base error and result types
//! - **Checksums**: streaming SHA-256 used by opt-in content verification
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use refstage_common::checksum::compute_file_checksum;
//!
//! fn fingerprint(path: &str) -> refstage_common::Result<()> {
//!     let digest = compute_file_checksum(path)?;
//!     tracing::info!(%digest, "reference fingerprint");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{Result, StageError};
