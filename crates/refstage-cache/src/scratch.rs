//! Scratch directory housekeeping

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Total size in bytes of a file or directory tree; missing paths count as zero
pub fn folder_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Delete one file unless `keep` is set; returns the bytes freed
pub fn remove_local_file(path: &Path, keep: bool) -> io::Result<u64> {
    if keep {
        debug!(path = %path.display(), "keeping scratch file");
        return Ok(0);
    }
    let len = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    fs::remove_file(path)?;
    debug!(path = %path.display(), bytes = len, "removed scratch file");
    Ok(len)
}

/// Delete a directory tree unless `keep` is set; returns the bytes freed
pub fn remove_local_dir(path: &Path, keep: bool) -> io::Result<u64> {
    if keep {
        debug!(path = %path.display(), "keeping scratch directory");
        return Ok(0);
    }
    if !path.exists() {
        return Ok(0);
    }
    let size = folder_size(path);
    fs::remove_dir_all(path)?;
    debug!(path = %path.display(), bytes = size, "removed scratch directory");
    Ok(size)
}

/// Decompress `src` into `dest_dir`, dropping a trailing `.gz`
///
/// Shared cache copies are never decompressed in place: other tasks may be
/// reading them. Files that are not gzip-named are returned untouched.
pub fn gunzip_into(src: &Path, dest_dir: &Path) -> io::Result<PathBuf> {
    let Some(name) = src.file_name().and_then(|n| n.to_str()) else {
        return Ok(src.to_path_buf());
    };
    let Some(stem) = name.strip_suffix(".gz") else {
        return Ok(src.to_path_buf());
    };

    fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.join(stem);
    let partial = dest_dir.join(format!("{stem}.partial"));

    let result = (|| {
        let mut decoder = GzDecoder::new(BufReader::new(File::open(src)?));
        let mut out = BufWriter::new(File::create(&partial)?);
        io::copy(&mut decoder, &mut out)?;
        out.into_inner().map_err(|e| e.into_error())?.sync_all()
    })();

    if let Err(e) = result {
        warn!(src = %src.display(), error = %e, "decompression failed");
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, &dest)?;
    debug!(src = %src.display(), dest = %dest.display(), "decompressed");
    Ok(dest)
}
