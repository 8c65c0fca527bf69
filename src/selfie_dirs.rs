//! Centralized filesystem locations for the updater.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | Linux | Windows |
//! |---------|-------|---------|
//! | Config + state | `~/.config/selfie/` | `%APPDATA%\selfie\` |
//! | Installer handoff | `~/.cache/selfie/install/` | `%LOCALAPPDATA%\selfie\install\` |
//!
//! # Environment Overrides
//!
//! - `SELFIE_CONFIG_DIR` overrides [`config_dir`]
//! - `SELFIE_HANDOFF_DIR` overrides [`handoff_dir`]

use std::path::PathBuf;

/// Application config directory.
///
/// Holds `config.toml` and `update-state.json`. Resolves to
/// `dirs::config_dir()/selfie/` unless `SELFIE_CONFIG_DIR` is set.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("SELFIE_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("selfie"))
        .unwrap_or_else(|| std::env::temp_dir().join("selfie-config"))
}

/// Persisted update state file (`config_dir()/update-state.json`).
#[must_use]
pub fn state_file() -> PathBuf {
    config_dir().join("update-state.json")
}

/// Per-user location where install scripts and staged artifacts are handed
/// off to the detached installer.
///
/// This lives outside any per-attempt scratch directory because the installer
/// runs after the updating process has exited. Resolves to
/// `dirs::cache_dir()/selfie/install/` unless `SELFIE_HANDOFF_DIR` is set.
#[must_use]
pub fn handoff_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("SELFIE_HANDOFF_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::cache_dir()
        .map(|d| d.join("selfie").join("install"))
        .unwrap_or_else(|| std::env::temp_dir().join("selfie-install"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_file_lives_in_config_dir() {
        let state = state_file();
        assert_eq!(state.parent(), Some(config_dir().as_path()));
        assert!(state.to_string_lossy().ends_with("update-state.json"));
    }

    #[test]
    fn handoff_dir_is_per_user() {
        if std::env::var_os("SELFIE_HANDOFF_DIR").is_some() {
            return;
        }
        let dir = handoff_dir();
        match dirs::cache_dir() {
            Some(cache) => {
                assert!(dir.starts_with(&cache));
                assert!(dir.ends_with("selfie/install"));
            }
            None => assert!(dir.ends_with("selfie-install")),
        }
    }
}
