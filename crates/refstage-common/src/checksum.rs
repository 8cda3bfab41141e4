//! Checksum computation and verification
//!
//! SHA-256 over a buffered stream. Reference files run to many gigabytes, so
//! nothing here reads a whole file into memory.

use crate::error::{Result, StageError};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

const BUFFER_SIZE: usize = 64 * 1024;

/// Compute the SHA-256 checksum of any readable source
pub fn compute_checksum<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the SHA-256 checksum of a file
pub fn compute_file_checksum(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path.as_ref())?;
    compute_checksum(&mut file)
}

/// Verify that a file matches the expected checksum (hex, case-insensitive)
pub fn verify_file_checksum(path: impl AsRef<Path>, expected: &str) -> Result<()> {
    let path = path.as_ref();
    let actual = compute_file_checksum(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(StageError::checksum_mismatch(
            path.display().to_string(),
            expected,
            actual,
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    #[test]
    fn test_compute_checksum() {
        let mut cursor = Cursor::new(b"hello world");
        let checksum = compute_checksum(&mut cursor).unwrap();
        assert_eq!(
            checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_compute_checksum_empty() {
        let mut cursor = Cursor::new(b"");
        let checksum = compute_checksum(&mut cursor).unwrap();
        assert_eq!(
            checksum,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_verify_file_checksum_success() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"test data").unwrap();
        temp_file.flush().unwrap();

        let expected = "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9";
        assert!(verify_file_checksum(temp_file.path(), expected).is_ok());
        assert!(verify_file_checksum(temp_file.path(), &expected.to_uppercase()).is_ok());
    }

    #[test]
    fn test_verify_file_checksum_failure() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"test data").unwrap();
        temp_file.flush().unwrap();

        let wrong = "0000000000000000000000000000000000000000000000000000000000000000";
        let result = verify_file_checksum(temp_file.path(), wrong);
        assert!(matches!(result.unwrap_err(), StageError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_checksum_spans_buffer_boundary() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let data = vec![7u8; BUFFER_SIZE * 3 + 17];
        temp_file.write_all(&data).unwrap();
        temp_file.flush().unwrap();

        let from_file = compute_file_checksum(temp_file.path()).unwrap();
        let from_memory = compute_checksum(&mut Cursor::new(&data)).unwrap();
        assert_eq!(from_file, from_memory);
        assert_eq!(from_file.len(), 64);
    }
}
