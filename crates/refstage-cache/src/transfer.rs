//! Verified file transfers between the remote store and local scratch
//!
//! Every copy is checked against the expected byte length (and optionally a
//! SHA-256 digest) and retried a bounded number of times. Downloads land in
//! `<dest>.partial` and are renamed only once verified, so a crash never
//! leaves a half-written file under a final name.
//!
//! A destination that already has the expected length is left alone. That is
//! what makes interrupted staging resumable: only missing or damaged files are
//! fetched again.

use crate::catalog::Verification;
use crate::error::{CacheError, Result};
use crate::storage::{RemoteStore, StoreError};
use refstage_common::checksum::verify_file_checksum;
use refstage_common::StageError;
use serde::Serialize;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Attempts per file before a transfer fails
pub const MAX_ATTEMPTS: u32 = 3;

/// Base delay between attempts; the actual delay is this times the attempt number
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Suffix of in-flight downloads
pub const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            retry_delay: RETRY_DELAY,
        }
    }
}

/// Running totals of verified traffic
#[derive(Debug, Default)]
pub struct TransferCounters {
    bytes_in: AtomicU64,
    files_in: AtomicU64,
    bytes_out: AtomicU64,
    files_out: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub bytes_in: u64,
    pub files_in: u64,
    pub bytes_out: u64,
    pub files_out: u64,
}

impl TransferCounters {
    fn record_in(&self, bytes: u64) {
        self.bytes_in.fetch_add(bytes, Ordering::Relaxed);
        self.files_in.fetch_add(1, Ordering::Relaxed);
    }

    fn record_out(&self, bytes: u64) {
        self.bytes_out.fetch_add(bytes, Ordering::Relaxed);
        self.files_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            files_in: self.files_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            files_out: self.files_out.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Remote object to local path
    Download,
    /// Local path to remote object
    Upload,
}

/// One file copy with its verification expectations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub source: String,
    pub dest: String,
    pub expected_len: u64,
    pub retries_remaining: u32,
    pub direction: Direction,
    pub verification: Verification,
}

impl TransferTask {
    pub fn download(remote: &str, local: &Path, expected_len: u64) -> Self {
        Self {
            source: remote.to_string(),
            dest: local.display().to_string(),
            expected_len,
            retries_remaining: MAX_ATTEMPTS,
            direction: Direction::Download,
            verification: Verification::Size,
        }
    }

    pub fn upload(local: &Path, remote: &str, expected_len: u64) -> Self {
        Self {
            source: local.display().to_string(),
            dest: remote.to_string(),
            expected_len,
            retries_remaining: MAX_ATTEMPTS,
            direction: Direction::Upload,
            verification: Verification::Size,
        }
    }

    pub fn with_verification(mut self, verification: Verification) -> Self {
        self.verification = verification;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries_remaining = retries;
        self
    }
}

/// Result of a single attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The destination is verified; `copied` is false when it already was
    Success { copied: bool },
    SizeMismatch { expected: u64, actual: u64 },
    ChecksumMismatch { expected: String, actual: String },
    IoFailure(String),
    /// The store could not be contacted; another attempt will not help
    Unreachable(String),
}

impl AttemptOutcome {
    fn describe(&self) -> String {
        match self {
            Self::Success { .. } => "success".to_string(),
            Self::SizeMismatch { expected, actual } => {
                format!("size mismatch: expected {expected} bytes, got {actual}")
            }
            Self::ChecksumMismatch { expected, actual } => {
                format!("checksum mismatch: expected {expected}, got {actual}")
            }
            Self::IoFailure(reason) => reason.clone(),
            Self::Unreachable(reason) => format!("remote store unreachable: {reason}"),
        }
    }

    fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::Unreachable(reason) => Self::Unreachable(reason),
            other => Self::IoFailure(other.to_string()),
        }
    }
}

/// Summary of a successful transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub attempts: u32,
    pub copied: bool,
    pub bytes: u64,
}

/// Moves files between a [`RemoteStore`] and the local filesystem
#[derive(Clone)]
pub struct TransferEngine {
    store: Arc<dyn RemoteStore>,
    policy: TransferPolicy,
    counters: Arc<TransferCounters>,
}

impl TransferEngine {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            policy: TransferPolicy::default(),
            counters: Arc::new(TransferCounters::default()),
        }
    }

    pub fn with_policy(mut self, policy: TransferPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_counters(mut self, counters: Arc<TransferCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn policy(&self) -> TransferPolicy {
        self.policy
    }

    pub fn counters(&self) -> &Arc<TransferCounters> {
        &self.counters
    }

    /// Run `task` until it verifies or its attempts run out
    #[instrument(skip(self, task), fields(from = %task.source, to = %task.dest))]
    pub async fn transfer(&self, mut task: TransferTask) -> Result<TransferReport> {
        if task.source == task.dest {
            debug!("source and destination are the same path, nothing to copy");
            return Ok(TransferReport {
                attempts: 0,
                copied: false,
                bytes: task.expected_len,
            });
        }

        let budget = task.retries_remaining;
        let mut attempts = 0;
        let mut last_failure = None;

        while task.retries_remaining > 0 {
            task.retries_remaining -= 1;
            attempts += 1;
            debug!(attempt = attempts, budget, "transfer attempt");

            let outcome = match task.direction {
                Direction::Download => self.attempt_download(&task).await,
                Direction::Upload => self.attempt_upload(&task).await,
            };

            match outcome {
                AttemptOutcome::Success { copied } => {
                    if copied {
                        info!(bytes = task.expected_len, attempts, "transfer verified");
                    } else {
                        debug!("destination already verified, copy skipped");
                    }
                    return Ok(TransferReport {
                        attempts,
                        copied,
                        bytes: task.expected_len,
                    });
                }
                AttemptOutcome::Unreachable(reason) => {
                    warn!(
                        attempt = attempts,
                        budget,
                        %reason,
                        "remote store unreachable, not retrying"
                    );
                    let remote = match task.direction {
                        Direction::Download => task.source,
                        Direction::Upload => task.dest,
                    };
                    return Err(CacheError::StoreUnreachable { remote, reason });
                }
                failure => {
                    let reason = failure.describe();
                    if task.retries_remaining > 0 {
                        let delay = self.policy.retry_delay * attempts;
                        warn!(
                            attempt = attempts,
                            budget,
                            %reason,
                            delay_ms = delay.as_millis() as u64,
                            "transfer attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(attempt = attempts, budget, %reason, "transfer attempt failed");
                    }
                    last_failure = Some(reason);
                }
            }
        }

        Err(CacheError::TransferFailed {
            from: task.source,
            to: task.dest,
            attempts,
            reason: last_failure.unwrap_or_else(|| "no attempts remaining".to_string()),
        })
    }

    /// Download one remote object with the engine's policy
    pub async fn download(
        &self,
        remote: &str,
        local: &Path,
        expected_len: u64,
        verification: Verification,
    ) -> Result<TransferReport> {
        let task = TransferTask::download(remote, local, expected_len)
            .with_verification(verification)
            .with_retries(self.policy.max_attempts);
        self.transfer(task).await
    }

    /// Upload one local file with the engine's policy
    pub async fn upload(&self, local: &Path, remote: &str) -> Result<TransferReport> {
        let expected_len = tokio::fs::metadata(local).await?.len();
        let task =
            TransferTask::upload(local, remote, expected_len).with_retries(self.policy.max_attempts);
        self.transfer(task).await
    }

    async fn attempt_download(&self, task: &TransferTask) -> AttemptOutcome {
        let dest = Path::new(&task.dest);

        match tokio::fs::metadata(dest).await {
            Ok(meta) if meta.len() == task.expected_len => {
                match self.verify_content(task, dest).await {
                    Ok(None) => return AttemptOutcome::Success { copied: false },
                    Ok(Some(mismatch)) => {
                        warn!(reason = %mismatch.describe(), "existing copy failed verification");
                        if let Err(e) = tokio::fs::remove_file(dest).await {
                            return AttemptOutcome::IoFailure(e.to_string());
                        }
                    }
                    Err(e) => return AttemptOutcome::IoFailure(e),
                }
            }
            Ok(meta) => {
                debug!(
                    expected = task.expected_len,
                    actual = meta.len(),
                    "existing copy has the wrong size, replacing"
                );
                if let Err(e) = tokio::fs::remove_file(dest).await {
                    return AttemptOutcome::IoFailure(e.to_string());
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return AttemptOutcome::IoFailure(e.to_string()),
        }

        if let Some(parent) = dest.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return AttemptOutcome::IoFailure(e.to_string());
            }
        }

        let partial = partial_path(dest);
        remove_if_present(&partial).await;

        if let Err(e) = self.store.copy_to_local(&task.source, &partial).await {
            remove_if_present(&partial).await;
            return AttemptOutcome::from_store(e);
        }

        let actual = match tokio::fs::metadata(&partial).await {
            Ok(meta) => meta.len(),
            Err(e) => return AttemptOutcome::IoFailure(e.to_string()),
        };
        self.counters.record_in(actual);

        if actual != task.expected_len {
            remove_if_present(&partial).await;
            return AttemptOutcome::SizeMismatch {
                expected: task.expected_len,
                actual,
            };
        }

        match self.verify_content(task, &partial).await {
            Ok(None) => {}
            Ok(Some(mismatch)) => {
                remove_if_present(&partial).await;
                return mismatch;
            }
            Err(e) => {
                remove_if_present(&partial).await;
                return AttemptOutcome::IoFailure(e);
            }
        }

        if let Err(e) = tokio::fs::rename(&partial, dest).await {
            return AttemptOutcome::IoFailure(e.to_string());
        }
        AttemptOutcome::Success { copied: true }
    }

    async fn attempt_upload(&self, task: &TransferTask) -> AttemptOutcome {
        let local = Path::new(&task.source);

        match self.store.exists(&task.dest).await {
            Ok(true) => match self.store.length(&task.dest).await {
                Ok(len) if len == task.expected_len => {
                    return AttemptOutcome::Success { copied: false }
                }
                Ok(len) => {
                    debug!(
                        expected = task.expected_len,
                        actual = len,
                        "remote copy has the wrong size, replacing"
                    );
                    if let Err(e) = self.store.delete(&task.dest).await {
                        return AttemptOutcome::from_store(e);
                    }
                }
                Err(e) => return AttemptOutcome::from_store(e),
            },
            Ok(false) => {}
            Err(e) => return AttemptOutcome::from_store(e),
        }

        if let Err(e) = self.store.copy_from_local(local, &task.dest).await {
            return AttemptOutcome::from_store(e);
        }

        match self.store.length(&task.dest).await {
            Ok(len) if len == task.expected_len => {
                self.counters.record_out(len);
                AttemptOutcome::Success { copied: true }
            }
            Ok(len) => AttemptOutcome::SizeMismatch {
                expected: task.expected_len,
                actual: len,
            },
            Err(e) => AttemptOutcome::from_store(e),
        }
    }

    /// `Ok(None)` when `local` passes the task's content check
    ///
    /// Size verification has no content check. Checksum verification falls
    /// back to size only when the store has no digest for the object.
    async fn verify_content(
        &self,
        task: &TransferTask,
        local: &Path,
    ) -> std::result::Result<Option<AttemptOutcome>, String> {
        if task.verification == Verification::Size {
            return Ok(None);
        }

        let expected = match self.store.checksum(&task.source).await {
            Ok(Some(digest)) => digest,
            Ok(None) => {
                warn!(from = %task.source, "store reports no checksum, verified by size only");
                return Ok(None);
            }
            Err(e) => return Err(e.to_string()),
        };

        let path = local.to_path_buf();
        let verified = tokio::task::spawn_blocking(move || verify_file_checksum(path, &expected))
            .await
            .map_err(|e| e.to_string())?;

        match verified {
            Ok(()) => Ok(None),
            Err(StageError::ChecksumMismatch {
                expected, actual, ..
            }) => Ok(Some(AttemptOutcome::ChecksumMismatch { expected, actual })),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// `<dest>.partial`
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn remove_if_present(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove partial download");
        }
    }
}
