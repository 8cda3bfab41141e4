//! Node-local exclusive locks with a persisted completion marker
//!
//! Each resource kind owns one lock file in the scratch directory. Holding
//! the OS-level exclusive lock on that file serializes every process on the
//! node that stages the kind. The first four bytes of the file hold a
//! big-endian `i32` completion marker; an empty or short file has no marker.
//!
//! The lock is advisory and only meaningful between processes that all go
//! through [`NodeLock`].

use crate::error::{CacheError, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Bytes occupied by the completion marker
pub const MARKER_LEN: usize = 4;

/// An exclusive lock on `<scratch>/<lock_name>`, held until released or dropped
#[derive(Debug)]
pub struct NodeLock {
    file: File,
    path: PathBuf,
    released: bool,
}

impl NodeLock {
    pub fn path_for(scratch_dir: &Path, lock_name: &str) -> PathBuf {
        scratch_dir.join(lock_name)
    }

    /// Block the calling task until the lock is held, without stalling the runtime
    pub async fn acquire(scratch_dir: &Path, lock_name: &str) -> Result<Self> {
        let dir = scratch_dir.to_path_buf();
        let name = lock_name.to_string();
        let path = Self::path_for(scratch_dir, lock_name);
        tokio::task::spawn_blocking(move || Self::acquire_blocking(&dir, &name))
            .await
            .map_err(|e| CacheError::lock(path.display().to_string(), std::io::Error::other(e)))?
    }

    /// Create the scratch directory and lock file if needed, then lock exclusively
    pub fn acquire_blocking(scratch_dir: &Path, lock_name: &str) -> Result<Self> {
        let path = Self::path_for(scratch_dir, lock_name);
        let lock_err = |e| CacheError::lock(path.display().to_string(), e);

        std::fs::create_dir_all(scratch_dir).map_err(lock_err)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_err)?;

        debug!(lock = %path.display(), "waiting for node lock");
        FileExt::lock_exclusive(&file).map_err(lock_err)?;
        debug!(lock = %path.display(), "node lock acquired");

        Ok(Self {
            file,
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored marker, or `None` when fewer than four bytes are present
    pub fn read_marker(&mut self) -> Result<Option<i32>> {
        let path = self.path.display().to_string();
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| CacheError::lock(path.clone(), e))?;
        read_marker_from(&mut self.file).map_err(|e| CacheError::lock(path, e))
    }

    /// Replace the file contents with `value` and flush it to disk
    pub fn write_marker(&mut self, value: i32) -> Result<()> {
        self.overwrite(&value.to_be_bytes())?;
        debug!(lock = %self.path.display(), marker = value, "completion marker written");
        Ok(())
    }

    /// Truncate the file so no marker is present
    pub fn clear_marker(&mut self) -> Result<()> {
        self.overwrite(&[])
    }

    fn overwrite(&mut self, bytes: &[u8]) -> Result<()> {
        let file = &mut self.file;
        let result = file
            .seek(SeekFrom::Start(0))
            .and_then(|_| file.set_len(0))
            .and_then(|_| file.write_all(bytes))
            .and_then(|_| file.sync_all());
        result.map_err(|e| CacheError::lock(self.path.display().to_string(), e))
    }

    /// Release the lock explicitly, surfacing any unlock error
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        FileExt::unlock(&self.file)
            .map_err(|e| CacheError::lock(self.path.display().to_string(), e))?;
        debug!(lock = %self.path.display(), "node lock released");
        Ok(())
    }
}

impl Drop for NodeLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = FileExt::unlock(&self.file) {
                warn!(lock = %self.path.display(), error = %e, "failed to release node lock");
            }
        }
    }
}

fn read_marker_from(reader: &mut impl Read) -> std::io::Result<Option<i32>> {
    let mut buf = [0u8; MARKER_LEN];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(Some(i32::from_be_bytes(buf))),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Read a marker without taking the lock
///
/// For status reporting only: the value can change as soon as it is read.
pub fn peek_marker(path: &Path) -> std::io::Result<Option<i32>> {
    match File::open(path) {
        Ok(mut file) => read_marker_from(&mut file),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
