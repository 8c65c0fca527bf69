//! Update manifest retrieval and validation.
//!
//! The manifest is a small JSON document:
//!
//! ```json
//! { "version": "1.0.1", "download_url": "https://…/selfie", "sha256": "ab12…" }
//! ```
//!
//! The digest field is also accepted as `digest`; when both are present
//! `sha256` wins. Unknown fields are ignored so servers can add metadata
//! without breaking older clients.

use crate::error::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Length of a hex-encoded SHA-256 digest.
const SHA256_HEX_LEN: usize = 64;

/// Descriptor of the latest available release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireManifest")]
pub struct UpdateManifest {
    /// Version of the published artifact.
    pub version: String,
    /// Absolute URL of the artifact.
    pub download_url: String,
    /// Expected hex-encoded SHA-256 of the artifact.
    pub sha256: String,
}

/// Manifest as sent by the server.
#[derive(Deserialize)]
struct WireManifest {
    version: String,
    download_url: String,
    sha256: Option<String>,
    digest: Option<String>,
}

impl TryFrom<WireManifest> for UpdateManifest {
    type Error = String;

    fn try_from(wire: WireManifest) -> std::result::Result<Self, Self::Error> {
        let sha256 = wire
            .sha256
            .or(wire.digest)
            .ok_or_else(|| "missing field `sha256`".to_owned())?;
        Ok(Self {
            version: wire.version,
            download_url: wire.download_url,
            sha256,
        })
    }
}

impl UpdateManifest {
    /// Parse and validate a manifest body.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Parse`] if the body is not JSON of the expected
    /// shape, the download URL is not absolute, or the digest is not 64 hex
    /// characters.
    pub fn parse(body: &str) -> Result<Self> {
        let manifest: Self =
            serde_json::from_str(body).map_err(|e| UpdateError::Parse(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(UpdateError::Parse("version is empty".to_owned()));
        }

        let url = url::Url::parse(&self.download_url).map_err(|e| {
            UpdateError::Parse(format!(
                "download_url {:?} is not an absolute URL: {e}",
                self.download_url
            ))
        })?;
        if url.cannot_be_a_base() {
            return Err(UpdateError::Parse(format!(
                "download_url {:?} is not a hierarchical URL",
                self.download_url
            )));
        }

        let digest = self.sha256.trim();
        if digest.len() != SHA256_HEX_LEN || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(UpdateError::Parse(format!(
                "sha256 {:?} is not a {SHA256_HEX_LEN}-character hex digest",
                self.sha256
            )));
        }

        Ok(())
    }
}

/// Fetch the manifest from `url`.
///
/// Issues exactly one GET; no retries.
///
/// # Errors
///
/// Returns [`UpdateError::Fetch`] on transport failure, non-success status,
/// or an unreadable body, and [`UpdateError::Parse`] on a malformed body.
pub fn fetch_manifest(agent: &ureq::Agent, url: &str) -> Result<UpdateManifest> {
    debug!(url, "fetching update manifest");

    let resp = agent
        .get(url)
        .call()
        .map_err(|e| UpdateError::Fetch(format!("{url}: {}", super::http::describe(e))))?;

    let body = resp
        .into_string()
        .map_err(|e| UpdateError::Fetch(format!("cannot read manifest body from {url}: {e}")))?;

    let manifest = UpdateManifest::parse(&body)?;
    info!(
        version = %manifest.version,
        download_url = %manifest.download_url,
        "update manifest received"
    );
    Ok(manifest)
}
