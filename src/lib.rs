//! Selfie: an executable that keeps itself up to date.
//!
//! On start the binary asks a manifest endpoint for the latest version. When
//! the announced version is newer it downloads the artifact, checks it against
//! the manifest's SHA-256 and puts it in place of the running executable.
//!
//! # Architecture
//!
//! - **Manifest**: `{version, download_url, sha256}` fetched with `ureq`
//! - **Comparator**: lexicographic by default, semver on request
//! - **Download + verify**: streamed to a scratch dir, hashed in chunks
//! - **Install**: atomic rename, or a detached script that waits out the lock

pub mod config;
pub mod error;
pub mod selfie_dirs;
pub mod update;

pub use config::UpdaterConfig;
pub use error::{Result, UpdateError};
pub use update::{UpdateOutcome, Updater};
