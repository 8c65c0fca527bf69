//! Install staging: getting the verified artifact into the executable's place.
//!
//! A running process cannot always overwrite its own backing file. On Unix the
//! directory entry can be swapped atomically while the old inode stays mapped,
//! so the artifact is renamed over the target directly. Elsewhere (Windows)
//! the executable stays locked until the process exits, so a small script is
//! written to the handoff directory and launched detached. It waits, deletes
//! the target in a retry loop until the lock is released, then copies the new
//! binary in.
//!
//! The script reports its progress by overwriting a status file with one of
//! `PENDING`, `DELETING`, `COPYING`, `DONE` or `FAILED` (see [`InstallState`]).
//! Exit codes: 0 done, 1 copy failed, 2 staged artifact missing, 3 delete
//! attempts exhausted.
//!
//! Scripts are safe to re-run. A target that is already gone counts as
//! deleted, and a run that finds the staged artifact consumed but the target
//! present reports `DONE` without touching anything.

use crate::config::InstallConfig;
use crate::error::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Base name of every file written to the handoff directory.
const HANDOFF_STEM: &str = "selfie_update";

/// Which install mechanism to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStrategy {
    /// Pick by [`InstallCapability::detect`].
    #[default]
    Auto,
    /// Atomic in-process replace. Only valid where the platform allows it.
    Direct,
    /// Detached script with a delete-retry loop.
    Script,
}

impl InstallStrategy {
    /// Resolve `Auto` against the platform capability.
    pub fn resolve(self, capability: InstallCapability) -> InstallMode {
        match self {
            Self::Direct => InstallMode::Direct,
            Self::Script => InstallMode::Script,
            Self::Auto if capability.can_replace_running => InstallMode::Direct,
            Self::Auto => InstallMode::Script,
        }
    }
}

/// Concrete install mechanism after resolving [`InstallStrategy::Auto`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Rename the verified artifact over the running executable.
    Direct,
    /// Hand off to a detached installer script.
    Script,
}

/// What the current platform allows for a running executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallCapability {
    /// Whether the backing file of a running executable can be replaced.
    pub can_replace_running: bool,
}

impl InstallCapability {
    /// Capability of the platform this binary was built for.
    pub fn detect() -> Self {
        Self {
            can_replace_running: cfg!(unix),
        }
    }
}

/// Progress of a detached install, as written to its status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallState {
    /// Script staged or started, waiting for the updater to exit.
    Pending,
    /// Trying to delete the old executable.
    Deleting,
    /// Copying the new executable into place.
    Copying,
    /// Replacement complete.
    Done,
    /// Replacement failed; see the script's exit code.
    Failed,
}

impl InstallState {
    /// Parse a status file line.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "PENDING" => Some(Self::Pending),
            "DELETING" => Some(Self::Deleting),
            "COPYING" => Some(Self::Copying),
            "DONE" => Some(Self::Done),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// `Done` and `Failed` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Read the state from a status file. `None` if missing or unrecognized.
    pub fn read(status_file: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(status_file).ok()?;
        Self::parse(&raw)
    }
}

impl std::fmt::Display for InstallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Deleting => write!(f, "DELETING"),
            Self::Copying => write!(f, "COPYING"),
            Self::Done => write!(f, "DONE"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Script dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    /// Windows `cmd.exe` batch file.
    Batch,
    /// POSIX `sh`.
    Posix,
}

impl ScriptFlavor {
    /// Dialect understood by the current platform.
    pub fn native() -> Self {
        if cfg!(target_os = "windows") {
            Self::Batch
        } else {
            Self::Posix
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Batch => "bat",
            Self::Posix => "sh",
        }
    }
}

/// Source and destination of a replacement, plus where progress is reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallPlan {
    /// Verified artifact staged in the handoff directory.
    pub source: PathBuf,
    /// Executable to replace.
    pub target: PathBuf,
    /// File the script overwrites with its [`InstallState`].
    pub status_file: PathBuf,
}

/// A written, not yet launched, install script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInstall {
    /// The script file.
    pub script: PathBuf,
    /// Dialect of [`script`](Self::script).
    pub flavor: ScriptFlavor,
    /// What the script will do.
    pub plan: InstallPlan,
}

/// Copy the verified artifact into `handoff_dir` and write an install script
/// that moves it over `target`.
///
/// The artifact is copied rather than referenced because the scratch
/// workspace it lives in is removed before the script runs. The handoff
/// directory is restricted to the current user, and each handoff file is
/// created fresh: whatever entry already had its name, including a symlink,
/// is unlinked first and never written through.
///
/// # Errors
///
/// Returns [`UpdateError::Stage`] if the handoff directory, staged artifact,
/// status file or script cannot be written, or a path cannot be expressed in
/// the script dialect.
pub fn stage_install(
    artifact: &Path,
    target: &Path,
    config: &InstallConfig,
    handoff_dir: &Path,
    flavor: ScriptFlavor,
) -> Result<StagedInstall> {
    prepare_handoff_dir(handoff_dir)?;

    let plan = InstallPlan {
        source: handoff_dir.join(format!("{HANDOFF_STEM}.new")),
        target: target.to_owned(),
        status_file: handoff_dir.join(format!("{HANDOFF_STEM}.status")),
    };
    let script = handoff_dir.join(format!("{HANDOFF_STEM}.{}", flavor.extension()));

    // Render first so unrepresentable paths fail before anything is copied.
    let body = render_script(flavor, &plan, config)?;

    copy_to_handoff(artifact, &plan.source)?;

    let written = write_executable(&script, body.as_bytes()).and_then(|()| {
        let status = format!("{}\n", InstallState::Pending);
        write_fresh(&plan.status_file, status.as_bytes(), 0o644)
    });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&plan.source);
        return Err(e);
    }

    info!(
        script = %script.display(),
        source = %plan.source.display(),
        target = %plan.target.display(),
        "install script staged"
    );
    Ok(StagedInstall {
        script,
        flavor,
        plan,
    })
}

/// Replace `target` with `artifact` in one atomic rename.
///
/// The artifact is first copied to a hidden sibling of `target` so the rename
/// never crosses filesystems. On failure the sibling is removed and `target`
/// is untouched.
///
/// # Errors
///
/// Returns [`UpdateError::Stage`] if the copy, permission change or rename fails.
pub fn replace_direct(artifact: &Path, target: &Path) -> Result<()> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            UpdateError::Stage(format!("target {} has no file name", target.display()))
        })?;
    let sibling = target.with_file_name(format!(".{name}.selfie-new"));

    let result = std::fs::copy(artifact, &sibling)
        .map_err(|e| {
            UpdateError::Stage(format!(
                "cannot copy {} -> {}: {e}",
                artifact.display(),
                sibling.display()
            ))
        })
        .and_then(|_| set_executable(&sibling))
        .and_then(|()| {
            std::fs::rename(&sibling, target).map_err(|e| {
                UpdateError::Stage(format!(
                    "cannot replace {} with {}: {e}",
                    target.display(),
                    sibling.display()
                ))
            })
        });

    if let Err(e) = result {
        if let Err(cleanup) = std::fs::remove_file(&sibling) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %sibling.display(), error = %cleanup, "cannot remove staged copy");
            }
        }
        return Err(e);
    }

    info!(target = %target.display(), "executable replaced in place");
    Ok(())
}

/// Render the install script for `plan`.
///
/// # Errors
///
/// Returns [`UpdateError::Stage`] if a path cannot be quoted for `flavor`.
pub fn render_script(
    flavor: ScriptFlavor,
    plan: &InstallPlan,
    config: &InstallConfig,
) -> Result<String> {
    match flavor {
        ScriptFlavor::Posix => render_posix(plan, config),
        ScriptFlavor::Batch => render_batch(plan, config),
    }
}

fn render_posix(plan: &InstallPlan, config: &InstallConfig) -> Result<String> {
    let source = sh_quote(&plan.source)?;
    let target = sh_quote(&plan.target)?;
    let status = sh_quote(&plan.status_file)?;
    let startup = sh_seconds(config.startup_delay_ms);
    let retry = sh_seconds(config.delete_retry_delay_ms);

    let give_up = match config.max_delete_attempts {
        Some(max) => format!(
            "    if [ \"$attempts\" -ge {max} ]; then\n        report FAILED\n        exit 3\n    fi\n"
        ),
        None => String::new(),
    };

    Ok(format!(
        r#"#!/bin/sh
# selfie installer: replace TARGET with SOURCE once the updater has exited.
SOURCE={source}
TARGET={target}
STATUS={status}

report() {{
    printf '%s\n' "$1" > "$STATUS"
}}

report PENDING
sleep {startup}

if [ ! -f "$SOURCE" ]; then
    if [ -f "$TARGET" ]; then
        report DONE
        exit 0
    fi
    report FAILED
    exit 2
fi

report DELETING
attempts=0
while [ -e "$TARGET" ]; do
    rm -f "$TARGET" 2>/dev/null
    [ -e "$TARGET" ] || break
    attempts=$((attempts + 1))
{give_up}    sleep {retry}
done

report COPYING
if ! cp "$SOURCE" "$TARGET"; then
    report FAILED
    exit 1
fi
chmod 755 "$TARGET" 2>/dev/null
rm -f "$SOURCE"
report DONE
exit 0
"#
    ))
}

fn render_batch(plan: &InstallPlan, config: &InstallConfig) -> Result<String> {
    let source = batch_quote(&plan.source)?;
    let target = batch_quote(&plan.target)?;
    let status = batch_quote(&plan.status_file)?;
    // `timeout` refuses to run with redirected stdin, which is how a detached
    // installer is launched; ping waits (n - 1) seconds.
    let startup_pings = config.startup_delay_ms.div_ceil(1000) + 1;
    let retry_pings = config.delete_retry_delay_ms.div_ceil(1000).max(1) + 1;

    let mut lines = vec![
        "@echo off".to_owned(),
        "rem selfie installer: replace the target once the updater has exited.".to_owned(),
        "set ATTEMPTS=0".to_owned(),
        format!("echo PENDING> {status}"),
        format!("ping -n {startup_pings} 127.0.0.1 > nul"),
        format!("if exist {source} goto DELETE"),
        format!("if exist {target} goto ALREADY_DONE"),
        format!("echo FAILED> {status}"),
        "exit /b 2".to_owned(),
        ":ALREADY_DONE".to_owned(),
        format!("echo DONE> {status}"),
        "exit /b 0".to_owned(),
        ":DELETE".to_owned(),
        format!("echo DELETING> {status}"),
        ":RETRY_DELETE".to_owned(),
        format!("del /f /q {target} 2>nul"),
        format!("if not exist {target} goto COPY"),
        "set /a ATTEMPTS+=1".to_owned(),
    ];
    if let Some(max) = config.max_delete_attempts {
        lines.push(format!("if %ATTEMPTS% GEQ {max} goto DELETE_FAILED"));
    }
    lines.extend([
        format!("ping -n {retry_pings} 127.0.0.1 > nul"),
        "goto RETRY_DELETE".to_owned(),
    ]);
    if config.max_delete_attempts.is_some() {
        lines.extend([
            ":DELETE_FAILED".to_owned(),
            format!("echo FAILED> {status}"),
            "exit /b 3".to_owned(),
        ]);
    }
    lines.extend([
        ":COPY".to_owned(),
        format!("echo COPYING> {status}"),
        format!("copy /Y {source} {target} > nul"),
        "if errorlevel 1 goto COPY_FAILED".to_owned(),
        format!("del /f /q {source} 2>nul"),
        format!("echo DONE> {status}"),
        "exit /b 0".to_owned(),
        ":COPY_FAILED".to_owned(),
        format!("echo FAILED> {status}"),
        "exit /b 1".to_owned(),
    ]);

    let mut script = lines.join("\r\n");
    script.push_str("\r\n");
    Ok(script)
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        UpdateError::Stage(format!("path {} is not valid UTF-8", path.display()))
    })
}

/// Single-quote for `sh`; embedded quotes become `'\''`.
fn sh_quote(path: &Path) -> Result<String> {
    let raw = path_str(path)?;
    Ok(format!("'{}'", raw.replace('\'', r"'\''")))
}

/// Double-quote for `cmd.exe`. `%` is doubled so it is not expanded.
fn batch_quote(path: &Path) -> Result<String> {
    let raw = path_str(path)?;
    if raw.contains(['"', '\r', '\n']) {
        return Err(UpdateError::Stage(format!(
            "path {raw:?} cannot be quoted for a batch script"
        )));
    }
    Ok(format!("\"{}\"", raw.replace('%', "%%")))
}

/// Milliseconds as an `sleep` argument (`1`, `0.250`).
fn sh_seconds(ms: u64) -> String {
    if ms % 1000 == 0 {
        format!("{}", ms / 1000)
    } else {
        format!("{}.{:03}", ms / 1000, ms % 1000)
    }
}

/// Create `dir` if needed and make it private to the current user.
fn prepare_handoff_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        UpdateError::Stage(format!("cannot create handoff dir {}: {e}", dir.display()))
    })?;
    let meta = std::fs::symlink_metadata(dir).map_err(|e| {
        UpdateError::Stage(format!("cannot inspect handoff dir {}: {e}", dir.display()))
    })?;
    if !meta.is_dir() {
        return Err(UpdateError::Stage(format!(
            "handoff dir {} is not a plain directory",
            dir.display()
        )));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Fails unless we own the directory.
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).map_err(|e| {
            UpdateError::Stage(format!(
                "cannot restrict handoff dir {}: {e}",
                dir.display()
            ))
        })?;
    }
    Ok(())
}

/// Unlink whatever is at `path`, then create it anew with `mode` (Unix).
fn create_fresh(path: &Path, mode: u32) -> Result<File> {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale handoff file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(UpdateError::Stage(format!(
                "cannot remove stale {}: {e}",
                path.display()
            )));
        }
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options
        .open(path)
        .map_err(|e| UpdateError::Stage(format!("cannot create {}: {e}", path.display())))
}

fn write_fresh(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    let mut file = create_fresh(path, mode)?;
    file.write_all(bytes)
        .map_err(|e| UpdateError::Stage(format!("cannot write {}: {e}", path.display())))
}

/// Copy the verified artifact to `dest` in the handoff directory.
fn copy_to_handoff(artifact: &Path, dest: &Path) -> Result<()> {
    let stage_err = |e: std::io::Error| {
        UpdateError::Stage(format!(
            "cannot stage artifact {} -> {}: {e}",
            artifact.display(),
            dest.display()
        ))
    };
    let mut src = File::open(artifact).map_err(stage_err)?;
    let mut out = create_fresh(dest, 0o600)?;
    let copied = std::io::copy(&mut src, &mut out).and_then(|_| out.sync_all());
    if let Err(e) = copied {
        drop(out);
        let _ = std::fs::remove_file(dest);
        return Err(stage_err(e));
    }
    Ok(())
}

fn write_executable(path: &Path, bytes: &[u8]) -> Result<()> {
    write_fresh(path, bytes, 0o755)?;
    set_executable(path)?;
    debug!(path = %path.display(), "install script written");
    Ok(())
}

/// Set executable permission on Unix platforms.
fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|e| {
            UpdateError::Stage(format!(
                "cannot set executable permission on {}: {e}",
                path.display()
            ))
        })?;
    }
    let _ = path;
    Ok(())
}
