//! Attempt-scoped scratch directory.

use crate::error::{Result, UpdateError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name prefix of every scratch directory.
pub const WORKSPACE_PREFIX: &str = "selfie-update_";

/// Uniquely named temporary directory for one update attempt.
///
/// Owns the downloaded artifact. The directory and everything in it is removed
/// when this value is dropped, whichever way the attempt ends.
#[derive(Debug)]
pub struct ScratchWorkspace(tempfile::TempDir);

impl ScratchWorkspace {
    /// Create a fresh workspace under `root`, or the system temp dir when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Io`] if the directory cannot be created.
    pub fn create(root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        debug!(path = %dir.path().display(), "created scratch workspace");
        Ok(Self(dir))
    }

    /// Workspace directory.
    pub fn path(&self) -> &Path {
        self.0.path()
    }

    /// Where the downloaded artifact is written.
    pub fn artifact_path(&self) -> PathBuf {
        self.path().join(artifact_filename())
    }

    /// Remove the workspace now, reporting failure instead of ignoring it.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Io`] if removal fails.
    pub fn close(self) -> Result<()> {
        let path = self.path().to_owned();
        self.0.close().map_err(|e| {
            UpdateError::Io(std::io::Error::new(
                e.kind(),
                format!("cannot remove scratch workspace {}: {e}", path.display()),
            ))
        })?;
        debug!(path = %path.display(), "removed scratch workspace");
        Ok(())
    }
}

/// Platform filename for the downloaded executable.
pub fn artifact_filename() -> &'static str {
    if cfg!(target_os = "windows") {
        "selfie.exe"
    } else {
        "selfie"
    }
}
