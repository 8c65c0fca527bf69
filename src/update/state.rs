//! Update state persistence.
//!
//! Records when the last check ran, which remote version it saw, and the
//! detached install (if any) that the previous run handed off. The next run
//! reads the installer's status file through this record, which is the only
//! way the outcome of a detached install is ever observed.

use super::stager::InstallPlan;
use crate::error::{Result, UpdateError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A detached install handed off by an earlier run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInstall {
    /// Version being installed.
    pub version: String,
    /// Script that was launched.
    pub script: PathBuf,
    /// Paths the script operates on.
    pub plan: InstallPlan,
    /// When the script was launched.
    pub launched_at: DateTime<Utc>,
}

/// Persistent update state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateState {
    /// Version that last wrote this state.
    pub current_version: String,
    /// Time of the last manifest check.
    pub last_check: Option<DateTime<Utc>>,
    /// Remote version seen at the last check.
    pub last_seen_version: Option<String>,
    /// Detached install awaiting confirmation.
    pub pending_install: Option<PendingInstall>,
}

impl PendingInstall {
    /// Whether the install was launched more than `max_age` before `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now.signed_duration_since(self.launched_at) > max_age
    }
}

impl Default for UpdateState {
    fn default() -> Self {
        Self {
            current_version: env!("CARGO_PKG_VERSION").to_owned(),
            last_check: None,
            last_seen_version: None,
            pending_install: None,
        }
    }
}

impl UpdateState {
    /// Load state from `path`. Returns the default state if the file is
    /// missing or cannot be parsed.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(_) => return Self::default(),
        };

        serde_json::from_slice(&bytes).unwrap_or_default()
    }

    /// Persist the state to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the file
    /// cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                UpdateError::Config(format!(
                    "cannot create state directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| UpdateError::Config(format!("cannot serialize update state: {e}")))?;

        std::fs::write(path, json).map_err(|e| {
            UpdateError::Config(format!(
                "cannot write update state to {}: {e}",
                path.display()
            ))
        })?;

        Ok(())
    }

    /// Record a manifest check that saw `remote_version`.
    pub fn mark_checked(&mut self, remote_version: &str) {
        self.last_check = Some(Utc::now());
        self.last_seen_version = Some(remote_version.to_owned());
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn pending() -> PendingInstall {
        PendingInstall {
            version: "1.0.1".to_owned(),
            script: PathBuf::from("/tmp/selfie-install/selfie_update.sh"),
            plan: InstallPlan {
                source: PathBuf::from("/tmp/selfie-install/selfie_update.new"),
                target: PathBuf::from("/usr/local/bin/selfie"),
                status_file: PathBuf::from("/tmp/selfie-install/selfie_update.status"),
            },
            launched_at: Utc::now(),
        }
    }

    #[test]
    fn pending_install_goes_stale_after_max_age() {
        let record = pending();
        let day = Duration::hours(24);
        assert!(!record.is_stale(record.launched_at + Duration::hours(23), day));
        assert!(record.is_stale(record.launched_at + Duration::hours(25), day));
    }

    #[test]
    fn default_state_has_current_version() {
        let state = UpdateState::default();
        assert_eq!(state.current_version, env!("CARGO_PKG_VERSION"));
        assert!(state.last_check.is_none());
        assert!(state.pending_install.is_none());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("update-state.json");

        let mut state = UpdateState::default();
        state.mark_checked("1.0.1");
        state.pending_install = Some(pending());
        state.save(&path).unwrap();

        let restored = UpdateState::load(&path);
        assert_eq!(restored.last_seen_version.as_deref(), Some("1.0.1"));
        assert!(restored.last_check.is_some());
        assert_eq!(restored.pending_install, state.pending_install);
    }

    #[test]
    fn load_returns_default_when_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = UpdateState::load(&dir.path().join("absent.json"));
        assert!(state.last_check.is_none());
    }

    #[test]
    fn load_returns_default_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update-state.json");
        std::fs::write(&path, "{{{").unwrap();
        assert!(UpdateState::load(&path).pending_install.is_none());
    }

    #[test]
    fn state_deserialize_from_partial_json() {
        let json = r#"{"current_version":"0.9.0"}"#;
        let state: UpdateState = serde_json::from_str(json).unwrap();
        assert_eq!(state.current_version, "0.9.0");
        assert!(state.last_seen_version.is_none());
    }
}
