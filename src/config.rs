//! Configuration types for the updater.

use crate::update::stager::InstallStrategy;
use crate::update::version::VersionPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Manifest endpoint used when nothing else is configured.
pub const DEFAULT_MANIFEST_URL: &str = "http://localhost:8080/update.json";

/// Top-level updater configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Endpoint serving the update manifest.
    pub manifest_url: String,
    /// Version of the running executable. Defaults to the crate version baked
    /// in at build time; tests inject synthetic values.
    pub current_version: String,
    /// Which version comparator decides whether an update is needed.
    pub version_policy: VersionPolicy,
    /// HTTP client settings.
    pub network: NetworkConfig,
    /// Install stager settings.
    pub install: InstallConfig,
    /// Parent directory for per-attempt scratch workspaces (None = system temp).
    pub workspace_root: Option<PathBuf>,
    /// Update state file (None = `selfie_dirs::state_file()`).
    pub state_file: Option<PathBuf>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            manifest_url: DEFAULT_MANIFEST_URL.to_owned(),
            current_version: env!("CARGO_PKG_VERSION").to_owned(),
            version_policy: VersionPolicy::default(),
            network: NetworkConfig::default(),
            install: InstallConfig::default(),
            workspace_root: None,
            state_file: None,
        }
    }
}

/// HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Overall per-request timeout in seconds (covers the whole download).
    pub timeout_secs: u64,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            timeout_secs: 300,
            user_agent: format!("selfie/{} (self-update)", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl NetworkConfig {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Install stager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Direct replace, detached script, or pick by platform capability.
    pub strategy: InstallStrategy,
    /// How long the installer waits before touching the executable, giving
    /// the updating process time to exit.
    pub startup_delay_ms: u64,
    /// Delay between delete attempts while the executable is still locked.
    pub delete_retry_delay_ms: u64,
    /// Give up deleting after this many attempts. `None` retries forever.
    pub max_delete_attempts: Option<u32>,
    /// Where scripts and staged artifacts are written
    /// (None = `selfie_dirs::handoff_dir()`).
    pub handoff_dir: Option<PathBuf>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            strategy: InstallStrategy::default(),
            startup_delay_ms: 1000,
            delete_retry_delay_ms: 1000,
            max_delete_attempts: None,
            handoff_dir: None,
        }
    }
}

impl UpdaterConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::UpdateError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::UpdateError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/selfie/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("selfie").join("config.toml")
        } else {
            crate::selfie_dirs::config_dir().join("config.toml")
        }
    }

    /// Resolved handoff directory for install scripts.
    pub fn handoff_dir(&self) -> PathBuf {
        self.install
            .handoff_dir
            .clone()
            .unwrap_or_else(crate::selfie_dirs::handoff_dir)
    }

    /// Resolved update state file.
    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(crate::selfie_dirs::state_file)
    }
}
