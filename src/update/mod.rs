//! Self-update system.
//!
//! Fetches a small manifest, compares its version with the running one, and
//! when newer downloads the artifact into a scratch workspace, verifies its
//! SHA-256, and installs it: an atomic rename where the platform allows
//! replacing a running executable, a detached installer script otherwise.

pub mod download;
pub mod http;
pub mod launcher;
pub mod manifest;
pub mod orchestrator;
pub mod stager;
pub mod state;
pub mod verify;
pub mod version;
pub mod workspace;

pub use launcher::{DetachedLauncher, InstallLauncher};
pub use manifest::UpdateManifest;
pub use orchestrator::{InstallHandoff, InstallReport, UpdateOutcome, Updater};
pub use stager::{InstallCapability, InstallState, InstallStrategy, StagedInstall};
pub use state::UpdateState;
pub use version::VersionPolicy;
