//! Hashing utilities for deterministic identity computation.
//!
//! SHA-256 is the one digest used everywhere in the engine. Build hashes,
//! output hashes, and cache entries all assume it; switching algorithms
//! invalidates every persisted cache and stash entry.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::UtilError;

/// Compute the SHA-256 hex digest of a byte slice.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute the SHA-256 hex digest of a file using streaming reads.
///
/// Uses a 64 KiB buffer to avoid loading the entire file into memory,
/// which matters for large build outputs.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn sha256_file(path: &Path) -> Result<String, UtilError> {
    let file = std::fs::File::open(path).map_err(|source| UtilError::io(path, source))?;
    let mut reader = std::io::BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = std::io::Read::read(&mut reader, &mut buf)
            .map_err(|source| UtilError::io(path, source))?;
        if n == 0 {
            break;
        }
        let Some(chunk) = buf.get(..n) else {
            break; // unreachable: n is bounded by buf.len()
        };
        hasher.update(chunk);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Combine multiple string parts into a single composite SHA-256 hash.
///
/// Each part is hashed in order with a length prefix, so no two distinct
/// part sequences produce the same digest and reordering parts changes it.
pub fn sha256_multi(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        // Length-prefix each part to avoid collisions like ["ab","c"] vs ["a","bc"].
        let len_bytes = part.len().to_le_bytes();
        hasher.update(len_bytes);
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn sha256_bytes_deterministic() {
        let a = sha256_bytes(b"hello");
        let b = sha256_bytes(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64); // 256 bits = 64 hex chars
    }

    #[test]
    fn sha256_bytes_different_input() {
        let a = sha256_bytes(b"hello");
        let b = sha256_bytes(b"world");
        assert_ne!(a, b);
    }

    #[test]
    fn sha256_bytes_empty() {
        let hash = sha256_bytes(b"");
        // Known SHA-256 of empty input
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn sha256_file_reads_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("test.txt");
        fs::write(&file, b"file content").unwrap();

        let hash = sha256_file(&file).unwrap();
        let expected = sha256_bytes(b"file content");
        assert_eq!(hash, expected);
    }

    #[test]
    fn sha256_file_missing() {
        let result = sha256_file(Path::new("/nonexistent/path/file.txt"));
        assert!(result.is_err());
    }

    #[test]
    fn sha256_multi_deterministic() {
        let a = sha256_multi(&["hello", "world"]);
        let b = sha256_multi(&["hello", "world"]);
        assert_eq!(a, b);
    }

    #[test]
    fn sha256_multi_order_matters() {
        let a = sha256_multi(&["hello", "world"]);
        let b = sha256_multi(&["world", "hello"]);
        assert_ne!(a, b);
    }

    #[test]
    fn sha256_multi_no_boundary_collision() {
        // ["ab", "c"] and ["a", "bc"] must produce different hashes
        let a = sha256_multi(&["ab", "c"]);
        let b = sha256_multi(&["a", "bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn sha256_multi_empty_parts() {
        let hash = sha256_multi(&[]);
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn sha256_multi_differs_from_concatenation() {
        let a = sha256_multi(&["helloworld"]);
        let b = sha256_multi(&["hello", "world"]);
        assert_ne!(a, b);
    }
}
