//! Content fingerprinting.
//!
//! Streams file bytes through SHA-256 in fixed-size chunks so large
//! documents never need to sit in memory whole. The hex digest is the
//! record's identity for duplicate detection: equal bytes always yield
//! an equal fingerprint, regardless of name or path.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::error::PipelineError;

const CHUNK_SIZE: usize = 64 * 1024;

/// Compute the SHA-256 of a file's bytes as lowercase hex.
///
/// Fails with an I/O error if the file cannot be opened or read; the
/// caller aborts registration of that file only.
pub async fn hash_file(path: &Path) -> Result<String, PipelineError> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| PipelineError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).await.map_err(|e| PipelineError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash an in-memory byte slice. Same digest as [`hash_file`] over a
/// file with identical content.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
