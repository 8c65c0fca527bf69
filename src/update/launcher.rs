//! Detached installer launch.
//!
//! Launching is a one-way hand-off: the child is never waited on and its
//! outcome is only observable through the status file it writes.

use super::stager::{ScriptFlavor, StagedInstall};
use crate::error::{Result, UpdateError};
use std::process::{Command, Stdio};
use tracing::info;

/// Starts a staged install script.
pub trait InstallLauncher: Send + Sync {
    /// Launch `staged` and return without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InstallSpawn`] if the process cannot be started.
    fn launch(&self, staged: &StagedInstall) -> Result<()>;
}

/// Spawns the script through the platform shell, detached from this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLauncher;

#[cfg(target_os = "windows")]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(target_os = "windows")]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

impl InstallLauncher for DetachedLauncher {
    fn launch(&self, staged: &StagedInstall) -> Result<()> {
        let mut cmd = match staged.flavor {
            ScriptFlavor::Batch => {
                let mut cmd = Command::new("cmd");
                cmd.arg("/C").arg(&staged.script);
                cmd
            }
            ScriptFlavor::Posix => {
                let mut cmd = Command::new("sh");
                cmd.arg(&staged.script);
                cmd
            }
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group: a Ctrl+C aimed at the updater must not kill it.
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| {
            UpdateError::InstallSpawn(format!(
                "cannot launch installer {}: {e}",
                staged.script.display()
            ))
        })?;

        info!(
            pid = child.id(),
            script = %staged.script.display(),
            "installer launched; exit to release the executable"
        );
        Ok(())
    }
}
