//! Runs generated POSIX install scripts for real.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use selfie::config::InstallConfig;
use selfie::update::stager::{ScriptFlavor, StagedInstall, stage_install};
use selfie::update::InstallState;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

fn quick_config(max_delete_attempts: Option<u32>) -> InstallConfig {
    InstallConfig {
        startup_delay_ms: 0,
        delete_retry_delay_ms: 20,
        max_delete_attempts,
        ..InstallConfig::default()
    }
}

fn stage(dir: &Path, config: &InstallConfig) -> StagedInstall {
    let artifact = dir.join("verified");
    std::fs::write(&artifact, b"new-content").unwrap();
    stage_install(
        &artifact,
        &dir.join("selfie"),
        config,
        &dir.join("handoff"),
        ScriptFlavor::Posix,
    )
    .unwrap()
}

fn run_script(staged: &StagedInstall) -> i32 {
    Command::new("sh")
        .arg(&staged.script)
        .status()
        .expect("run install script")
        .code()
        .expect("exit code")
}

#[test]
fn replaces_target_and_reports_done() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("selfie"), b"old-content").unwrap();
    let staged = stage(dir.path(), &quick_config(None));

    assert_eq!(run_script(&staged), 0);
    assert_eq!(std::fs::read(&staged.plan.target).unwrap(), b"new-content");
    assert_eq!(InstallState::read(&staged.plan.status_file), Some(InstallState::Done));
    assert!(!staged.plan.source.exists());
}

#[test]
fn rerun_after_completion_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("selfie"), b"old-content").unwrap();
    let staged = stage(dir.path(), &quick_config(None));

    assert_eq!(run_script(&staged), 0);
    assert_eq!(run_script(&staged), 0);
    assert_eq!(std::fs::read(&staged.plan.target).unwrap(), b"new-content");
    assert_eq!(InstallState::read(&staged.plan.status_file), Some(InstallState::Done));
}

#[test]
fn missing_target_counts_as_deleted() {
    // State after a run whose copy step never happened.
    let dir = tempfile::tempdir().unwrap();
    let staged = stage(dir.path(), &quick_config(Some(1)));
    assert!(!staged.plan.target.exists());

    assert_eq!(run_script(&staged), 0);
    assert_eq!(std::fs::read(&staged.plan.target).unwrap(), b"new-content");
}

#[test]
fn nothing_to_install_fails_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    let staged = stage(dir.path(), &quick_config(None));
    std::fs::remove_file(&staged.plan.source).unwrap();

    assert_eq!(run_script(&staged), 2);
    assert_eq!(InstallState::read(&staged.plan.status_file), Some(InstallState::Failed));
}

#[test]
fn bounded_delete_gives_up_and_keeps_target() {
    // A non-empty directory survives `rm -f`, like a locked executable.
    let dir = tempfile::tempdir().unwrap();
    let locked = dir.path().join("selfie");
    std::fs::create_dir_all(locked.join("busy")).unwrap();
    let staged = stage(dir.path(), &quick_config(Some(3)));

    assert_eq!(run_script(&staged), 3);
    assert!(locked.join("busy").exists());
    assert_eq!(InstallState::read(&staged.plan.status_file), Some(InstallState::Failed));
    assert!(staged.plan.source.exists());
}

#[test]
fn unbounded_delete_waits_for_lock_release() {
    let dir = tempfile::tempdir().unwrap();
    let locked = dir.path().join("selfie");
    std::fs::create_dir_all(locked.join("busy")).unwrap();
    let staged = stage(dir.path(), &quick_config(None));

    let mut child = Command::new("sh").arg(&staged.script).spawn().unwrap();

    // Wait until the installer is looping on the "lock".
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while InstallState::read(&staged.plan.status_file) != Some(InstallState::Deleting)
        && std::time::Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(100));
    assert!(child.try_wait().unwrap().is_none());

    std::fs::remove_dir_all(&locked).unwrap();
    let status = child.wait().unwrap();

    assert!(status.success());
    assert_eq!(std::fs::read(&locked).unwrap(), b"new-content");
    assert_eq!(InstallState::read(&staged.plan.status_file), Some(InstallState::Done));
}

#[test]
fn copy_failure_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("verified");
    std::fs::write(&artifact, b"new-content").unwrap();
    let staged = stage_install(
        &artifact,
        &dir.path().join("no-such-dir").join("selfie"),
        &quick_config(Some(1)),
        &dir.path().join("handoff"),
        ScriptFlavor::Posix,
    )
    .unwrap();

    assert_eq!(run_script(&staged), 1);
    assert_eq!(InstallState::read(&staged.plan.status_file), Some(InstallState::Failed));
    assert!(staged.plan.source.exists());
}

#[test]
fn paths_with_spaces_and_quotes_survive() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("it's a dir");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("selfie"), b"old-content").unwrap();
    let staged = stage(&root, &quick_config(None));

    assert_eq!(run_script(&staged), 0);
    assert_eq!(std::fs::read(root.join("selfie")).unwrap(), b"new-content");
}
