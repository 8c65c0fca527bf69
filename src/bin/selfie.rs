//! Selfie binary: check for an update on every start.

use selfie::update::{InstallHandoff, InstallState};
use selfie::{UpdateOutcome, Updater, UpdaterConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("selfie=info")),
        )
        .init();

    let config = load_config()?;
    println!("Current version is {}", config.current_version);

    let updater = Updater::new(config);

    if let Some(report) = updater.previous_install_report() {
        match report.state {
            Some(InstallState::Done) => println!("Updated to {}", report.version),
            Some(InstallState::Failed) => println!(
                "Update to {} failed; {} was left unchanged",
                report.version,
                report.plan.target.display()
            ),
            _ => {}
        }
    }

    match updater.check_and_update() {
        Ok(UpdateOutcome::NoUpdateAvailable { .. }) => println!("No updates available"),
        Ok(UpdateOutcome::UpdateInstalled { version, handoff }) => match handoff {
            InstallHandoff::Replaced { target } => {
                println!("Updated to {version}; restart {} to use it", target.display());
            }
            InstallHandoff::Detached { script, .. } => {
                info!(
                    script = %script.display(),
                    "exiting so the installer can replace the executable"
                );
                println!("Installing {version}; exiting");
            }
        },
        // The running executable is untouched; carry on as the current version.
        Err(e) => error!(stage = e.stage(), error = %e, "update check failed"),
    }

    Ok(())
}

/// `SELFIE_CONFIG`, then the default config path if present, then defaults.
/// `SELFIE_MANIFEST_URL` overrides the endpoint in every case.
fn load_config() -> anyhow::Result<UpdaterConfig> {
    let mut config = if let Some(path) = std::env::var_os("SELFIE_CONFIG") {
        UpdaterConfig::from_file(std::path::Path::new(&path))?
    } else {
        let default_path = UpdaterConfig::default_config_path();
        if default_path.is_file() {
            UpdaterConfig::from_file(&default_path)?
        } else {
            UpdaterConfig::default()
        }
    };

    if let Ok(url) = std::env::var("SELFIE_MANIFEST_URL") {
        config.manifest_url = url;
    }
    Ok(config)
}
