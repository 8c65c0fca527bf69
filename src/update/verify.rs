//! Artifact integrity verification.
//!
//! The downloaded artifact must hash to the manifest's SHA-256 before anything
//! is staged or replaced. A mismatch is always fatal to the attempt.

use crate::error::{Result, UpdateError};
use sha2::{Digest, Sha256};
use std::io::{self, Read};
use std::path::Path;
use tracing::{info, warn};

/// Compute the lowercase hex SHA-256 of a file's contents.
///
/// Reads in 64 KiB chunks so large binaries are never held in memory.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 65_536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(format!("{digest:x}"))
}

/// Verify `path` against the expected hex digest.
///
/// Comparison ignores ASCII case and surrounding whitespace.
///
/// # Errors
///
/// Returns [`UpdateError::Integrity`] on mismatch and
/// [`UpdateError::Download`] if the artifact cannot be read back.
pub fn verify_artifact(path: &Path, expected_sha256: &str) -> Result<()> {
    let actual = sha256_file(path).map_err(|e| {
        UpdateError::Download(format!(
            "cannot read artifact {} for checksum: {e}",
            path.display()
        ))
    })?;

    let expected = expected_sha256.trim();
    if actual.eq_ignore_ascii_case(expected) {
        info!(path = %path.display(), "artifact checksum ok");
        Ok(())
    } else {
        warn!(
            path = %path.display(),
            expected,
            actual = %actual,
            "artifact checksum mismatch"
        );
        Err(UpdateError::Integrity {
            expected: expected.to_owned(),
            actual,
        })
    }
}
