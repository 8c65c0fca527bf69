//! Streaming artifact download.

use crate::error::{Result, UpdateError};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CHUNK_SIZE: usize = 64 * 1024;

/// Download `url` into `dest`, streaming the body in 64 KiB chunks.
///
/// Returns the number of bytes written. On any failure the partially written
/// `dest` is removed before the error is returned.
///
/// # Errors
///
/// Returns [`UpdateError::Download`] on transport failure, non-success status,
/// a read or write error mid-transfer, or a body shorter than the announced
/// `Content-Length`.
pub fn download_artifact(agent: &ureq::Agent, url: &str, dest: &Path) -> Result<u64> {
    info!(url, dest = %dest.display(), "downloading update");

    let resp = agent
        .get(url)
        .call()
        .map_err(|e| UpdateError::Download(format!("{url}: {}", super::http::describe(e))))?;

    // Content-Length counts encoded bytes; only comparable for identity bodies.
    let announced = resp
        .header("content-length")
        .filter(|_| resp.header("content-encoding").is_none())
        .and_then(|v| v.parse::<u64>().ok());

    let mut partial = PartialFile::create(dest)?;
    let mut reader = resp.into_reader();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written: u64 = 0;
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| UpdateError::Download(format!("download read error: {e}")))?;
        if n == 0 {
            break;
        }
        partial.write_all(&buf[..n])?;
        written += n as u64;
    }

    if let Some(expected) = announced {
        if written != expected {
            return Err(UpdateError::Download(format!(
                "truncated transfer: received {written} of {expected} bytes"
            )));
        }
    }

    partial.finish()?;
    debug!(bytes = written, dest = %dest.display(), "download complete");
    Ok(written)
}

/// A file being written that is deleted on drop unless [`finish`](Self::finish)
/// succeeds.
struct PartialFile {
    path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl PartialFile {
    fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            UpdateError::Download(format!("cannot create {}: {e}", path.display()))
        })?;
        Ok(Self {
            path: path.to_owned(),
            file: Some(file),
            committed: false,
        })
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| UpdateError::Download("partial file already closed".to_owned()))?;
        file.write_all(bytes)
            .map_err(|e| UpdateError::Download(format!("download write failed: {e}")))
    }

    fn finish(mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()
                .map_err(|e| UpdateError::Download(format!("download flush failed: {e}")))?;
        }
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        // Close before removing; Windows refuses to delete open files.
        drop(self.file.take());
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed partial download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "cannot remove partial download"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn partial_file_removed_when_dropped_unfinished() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact");
        {
            let mut partial = PartialFile::create(&path).unwrap();
            partial.write_all(b"half of a binary").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn finished_file_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact");
        let mut partial = PartialFile::create(&path).unwrap();
        partial.write_all(b"whole binary").unwrap();
        partial.finish().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"whole binary");
    }

    #[test]
    fn unreachable_host_is_download_error_and_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("artifact");
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(2))
            .build();

        // Port 9 (discard) on localhost is almost never listening.
        let err = download_artifact(&agent, "http://127.0.0.1:9/selfie", &dest).unwrap_err();
        assert!(matches!(err, UpdateError::Download(_)));
        assert!(!dest.exists());
    }
}
