//! Check-and-update sequencing.

use super::download::download_artifact;
use super::http::http_agent;
use super::launcher::{DetachedLauncher, InstallLauncher};
use super::manifest::{UpdateManifest, fetch_manifest};
use super::stager::{
    InstallCapability, InstallMode, InstallPlan, InstallState, ScriptFlavor, replace_direct,
    stage_install,
};
use super::state::{PendingInstall, UpdateState};
use super::verify::verify_artifact;
use super::workspace::ScratchWorkspace;
use crate::config::UpdaterConfig;
use crate::error::{Result, UpdateError};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A non-terminal install record older than this is assumed abandoned.
const STALE_PENDING_HOURS: i64 = 24;

/// How the new executable reached (or will reach) its place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallHandoff {
    /// Replaced in place. Takes effect on the next start.
    Replaced {
        /// The replaced executable.
        target: PathBuf,
    },
    /// A detached installer was launched. The caller must exit so the
    /// installer can delete the locked executable.
    Detached {
        /// The launched script.
        script: PathBuf,
        /// Paths the script operates on.
        plan: InstallPlan,
    },
}

/// Result of a successful check-and-update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Remote version is not newer. Nothing was downloaded.
    NoUpdateAvailable {
        /// Version the manifest announced.
        remote_version: String,
    },
    /// The verified artifact was installed or handed to an installer.
    UpdateInstalled {
        /// Installed version.
        version: String,
        /// Install mechanism used.
        handoff: InstallHandoff,
    },
}

impl UpdateOutcome {
    /// Whether the caller must exit for the update to complete.
    pub fn requires_exit(&self) -> bool {
        matches!(
            self,
            Self::UpdateInstalled {
                handoff: InstallHandoff::Detached { .. },
                ..
            }
        )
    }
}

/// What became of the detached install launched by a previous run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Version that was being installed.
    pub version: String,
    /// Last state the installer reported; `None` if its status file is gone.
    pub state: Option<InstallState>,
    /// Paths the installer operated on.
    pub plan: InstallPlan,
}

/// Sequences manifest fetch, comparison, download, verification and install.
pub struct Updater {
    config: UpdaterConfig,
    agent: ureq::Agent,
    target: Option<PathBuf>,
    launcher: Box<dyn InstallLauncher>,
    capability: InstallCapability,
    flavor: ScriptFlavor,
}

impl Updater {
    /// Create an updater for the running executable.
    pub fn new(config: UpdaterConfig) -> Self {
        let agent = http_agent(&config.network);
        Self {
            config,
            agent,
            target: None,
            launcher: Box::new(DetachedLauncher),
            capability: InstallCapability::detect(),
            flavor: ScriptFlavor::native(),
        }
    }

    /// Replace a different executable instead of `current_exe()`.
    #[must_use]
    pub fn with_target_executable(mut self, target: impl Into<PathBuf>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Use a custom installer launcher.
    #[must_use]
    pub fn with_launcher(mut self, launcher: impl InstallLauncher + 'static) -> Self {
        self.launcher = Box::new(launcher);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Fetch the manifest and, if it announces a newer version, download,
    /// verify and install it.
    ///
    /// A remote version that is not newer returns
    /// [`UpdateOutcome::NoUpdateAvailable`] without touching the filesystem.
    /// Otherwise the scratch workspace exists only between the version
    /// decision and the return of this call, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns the first stage error; nothing later in the pipeline runs and
    /// the running executable is left unchanged.
    pub fn check_and_update(&self) -> Result<UpdateOutcome> {
        info!(current = %self.config.current_version, "checking for updates");
        let manifest = fetch_manifest(&self.agent, &self.config.manifest_url)?;

        if !self
            .config
            .version_policy
            .needs_update(&manifest.version, &self.config.current_version)
        {
            info!(
                remote = %manifest.version,
                current = %self.config.current_version,
                "no updates available"
            );
            return Ok(UpdateOutcome::NoUpdateAvailable {
                remote_version: manifest.version,
            });
        }

        info!(version = %manifest.version, "new version available");
        self.record_check(&manifest.version);
        let target = self.target_executable()?;

        let workspace = ScratchWorkspace::create(self.config.workspace_root.as_deref())?;
        let outcome = self.apply(&manifest, &target, &workspace);
        if let Err(e) = workspace.close() {
            warn!(error = %e, "scratch workspace cleanup failed");
        }

        if let Err(e) = &outcome {
            warn!(stage = e.stage(), error = %e, "update aborted");
        }
        outcome
    }

    fn apply(
        &self,
        manifest: &UpdateManifest,
        target: &Path,
        workspace: &ScratchWorkspace,
    ) -> Result<UpdateOutcome> {
        let artifact = workspace.artifact_path();
        download_artifact(&self.agent, &manifest.download_url, &artifact)?;
        verify_artifact(&artifact, &manifest.sha256)?;

        let handoff = match self.config.install.strategy.resolve(self.capability) {
            InstallMode::Direct => {
                replace_direct(&artifact, target)?;
                InstallHandoff::Replaced {
                    target: target.to_owned(),
                }
            }
            InstallMode::Script => {
                let staged = stage_install(
                    &artifact,
                    target,
                    &self.config.install,
                    &self.config.handoff_dir(),
                    self.flavor,
                )?;
                if let Err(e) = self.launcher.launch(&staged) {
                    for path in [&staged.plan.source, &staged.script, &staged.plan.status_file] {
                        let _ = std::fs::remove_file(path);
                    }
                    return Err(e);
                }
                self.record_pending(&manifest.version, &staged.script, &staged.plan);
                InstallHandoff::Detached {
                    script: staged.script,
                    plan: staged.plan,
                }
            }
        };

        info!(version = %manifest.version, "update installed");
        Ok(UpdateOutcome::UpdateInstalled {
            version: manifest.version.clone(),
            handoff,
        })
    }

    /// Report on the detached install a previous run launched, if any.
    ///
    /// The record is cleared once the installer reached a terminal state, left
    /// no status behind, or was launched more than a day ago without
    /// finishing. A successful installer's files are removed.
    pub fn previous_install_report(&self) -> Option<InstallReport> {
        let path = self.config.state_file();
        let mut state = UpdateState::load(&path);
        let pending = state.pending_install.clone()?;
        let status = InstallState::read(&pending.plan.status_file);
        let stale = pending.is_stale(
            chrono::Utc::now(),
            chrono::Duration::hours(STALE_PENDING_HOURS),
        );

        match status {
            Some(InstallState::Done) => info!(
                version = %pending.version,
                target = %pending.plan.target.display(),
                "previous update installed"
            ),
            Some(InstallState::Failed) => warn!(
                version = %pending.version,
                script = %pending.script.display(),
                "previous update failed; the installer script was kept for inspection"
            ),
            Some(other) if stale => warn!(
                version = %pending.version,
                state = %other,
                launched_at = %pending.launched_at,
                "previous update never finished; forgetting it"
            ),
            Some(other) => info!(
                version = %pending.version,
                state = %other,
                "previous update still in progress"
            ),
            None => warn!(
                version = %pending.version,
                status_file = %pending.plan.status_file.display(),
                "previous update left no status"
            ),
        }

        if stale || status.is_none_or(InstallState::is_terminal) {
            if status == Some(InstallState::Done) {
                let _ = std::fs::remove_file(&pending.script);
                let _ = std::fs::remove_file(&pending.plan.status_file);
            }
            state.pending_install = None;
            if let Err(e) = state.save(&path) {
                warn!(error = %e, "cannot persist update state");
            }
        }

        Some(InstallReport {
            version: pending.version,
            state: status,
            plan: pending.plan,
        })
    }

    fn target_executable(&self) -> Result<PathBuf> {
        if let Some(target) = &self.target {
            return Ok(target.clone());
        }
        let exe = std::env::current_exe().map_err(|e| {
            UpdateError::Stage(format!("cannot determine current executable path: {e}"))
        })?;
        std::path::absolute(&exe).map_err(|e| {
            UpdateError::Stage(format!(
                "cannot make executable path {} absolute: {e}",
                exe.display()
            ))
        })
    }

    fn record_check(&self, remote_version: &str) {
        let path = self.config.state_file();
        let mut state = UpdateState::load(&path);
        state.current_version = self.config.current_version.clone();
        state.mark_checked(remote_version);
        if let Err(e) = state.save(&path) {
            warn!(error = %e, "cannot persist update state");
        }
    }

    fn record_pending(&self, version: &str, script: &Path, plan: &InstallPlan) {
        let path = self.config.state_file();
        let mut state = UpdateState::load(&path);
        state.pending_install = Some(PendingInstall {
            version: version.to_owned(),
            script: script.to_owned(),
            plan: plan.clone(),
            launched_at: chrono::Utc::now(),
        });
        if let Err(e) = state.save(&path) {
            warn!(error = %e, "cannot persist update state");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn config_in(dir: &Path) -> UpdaterConfig {
        let mut config = UpdaterConfig::default();
        config.manifest_url = "http://127.0.0.1:9/update.json".to_owned();
        config.current_version = "1.0.0".to_owned();
        config.network.timeout_secs = 2;
        config.workspace_root = Some(dir.join("scratch"));
        config.state_file = Some(dir.join("state.json"));
        config.install.handoff_dir = Some(dir.join("handoff"));
        config
    }

    fn pending_in(dir: &Path, status: Option<&str>) -> PendingInstall {
        let plan = InstallPlan {
            source: dir.join("handoff").join("selfie_update.new"),
            target: dir.join("selfie"),
            status_file: dir.join("handoff").join("selfie_update.status"),
        };
        std::fs::create_dir_all(dir.join("handoff")).unwrap();
        std::fs::write(dir.join("handoff").join("selfie_update.sh"), "#!/bin/sh\n").unwrap();
        if let Some(status) = status {
            std::fs::write(&plan.status_file, status).unwrap();
        }
        PendingInstall {
            version: "1.0.1".to_owned(),
            script: dir.join("handoff").join("selfie_update.sh"),
            plan,
            launched_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn unreachable_manifest_is_fetch_error_without_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let updater = Updater::new(config_in(dir.path()));

        let err = updater.check_and_update().unwrap_err();
        assert!(matches!(err, UpdateError::Fetch(_)));
        assert!(!dir.path().join("scratch").exists());
    }

    #[test]
    fn requires_exit_only_for_detached() {
        let detached = UpdateOutcome::UpdateInstalled {
            version: "1.0.1".to_owned(),
            handoff: InstallHandoff::Detached {
                script: PathBuf::from("s"),
                plan: InstallPlan {
                    source: PathBuf::from("a"),
                    target: PathBuf::from("b"),
                    status_file: PathBuf::from("c"),
                },
            },
        };
        let replaced = UpdateOutcome::UpdateInstalled {
            version: "1.0.1".to_owned(),
            handoff: InstallHandoff::Replaced {
                target: PathBuf::from("b"),
            },
        };
        let none = UpdateOutcome::NoUpdateAvailable {
            remote_version: "1.0.0".to_owned(),
        };
        assert!(detached.requires_exit());
        assert!(!replaced.requires_exit());
        assert!(!none.requires_exit());
    }

    #[test]
    fn no_previous_install_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let updater = Updater::new(config_in(dir.path()));
        assert!(updater.previous_install_report().is_none());
    }

    #[test]
    fn finished_install_is_reported_once_and_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let pending = pending_in(dir.path(), Some("DONE\n"));
        let state = UpdateState {
            pending_install: Some(pending.clone()),
            ..UpdateState::default()
        };
        state.save(&config.state_file()).unwrap();

        let updater = Updater::new(config);
        let report = updater.previous_install_report().unwrap();
        assert_eq!(report.state, Some(InstallState::Done));
        assert_eq!(report.version, "1.0.1");
        assert!(!pending.script.exists());
        assert!(!pending.plan.status_file.exists());

        assert!(updater.previous_install_report().is_none());
    }

    #[test]
    fn failed_install_keeps_script() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let pending = pending_in(dir.path(), Some("FAILED\r\n"));
        let state = UpdateState {
            pending_install: Some(pending.clone()),
            ..UpdateState::default()
        };
        state.save(&config.state_file()).unwrap();

        let updater = Updater::new(config);
        let report = updater.previous_install_report().unwrap();
        assert_eq!(report.state, Some(InstallState::Failed));
        assert!(pending.script.exists());
        assert!(updater.previous_install_report().is_none());
    }

    #[test]
    fn in_progress_install_stays_pending() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let pending = pending_in(dir.path(), Some("DELETING\n"));
        let state = UpdateState {
            pending_install: Some(pending),
            ..UpdateState::default()
        };
        state.save(&config.state_file()).unwrap();

        let updater = Updater::new(config);
        assert_eq!(
            updater.previous_install_report().unwrap().state,
            Some(InstallState::Deleting)
        );
        assert_eq!(
            updater.previous_install_report().unwrap().state,
            Some(InstallState::Deleting)
        );
    }

    #[test]
    fn abandoned_install_is_forgotten_after_a_day() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let mut pending = pending_in(dir.path(), Some("DELETING\n"));
        pending.launched_at = chrono::Utc::now() - chrono::Duration::hours(25);
        let state = UpdateState {
            pending_install: Some(pending.clone()),
            ..UpdateState::default()
        };
        state.save(&config.state_file()).unwrap();

        let updater = Updater::new(config);
        assert_eq!(
            updater.previous_install_report().unwrap().state,
            Some(InstallState::Deleting)
        );
        assert!(updater.previous_install_report().is_none());
        // Not DONE, so the script stays for inspection.
        assert!(pending.script.exists());
    }

    #[test]
    fn missing_status_is_reported_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let state = UpdateState {
            pending_install: Some(pending_in(dir.path(), None)),
            ..UpdateState::default()
        };
        state.save(&config.state_file()).unwrap();

        let updater = Updater::new(config);
        assert_eq!(updater.previous_install_report().unwrap().state, None);
        assert!(updater.previous_install_report().is_none());
    }
}
