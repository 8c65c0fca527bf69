//! Error types for the self-update pipeline.

/// Top-level error type for a check-and-update attempt.
///
/// Each variant names the pipeline stage that failed so the caller can log
/// meaningfully. None of these are retried by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Manifest endpoint unreachable, non-success status, or unreadable body.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Manifest body is not a valid update descriptor.
    #[error("manifest parse error: {0}")]
    Parse(String),

    /// Artifact transfer failed. The partial file has already been removed.
    #[error("download error: {0}")]
    Download(String),

    /// Downloaded artifact does not hash to the manifest digest.
    #[error("integrity error: checksum mismatch: expected {expected}, got {actual}")]
    Integrity {
        /// Digest announced by the manifest.
        expected: String,
        /// Digest computed over the downloaded bytes.
        actual: String,
    },

    /// Install instructions could not be produced (executable path, handoff
    /// directory, staged copy, or script write).
    #[error("stage error: {0}")]
    Stage(String),

    /// The detached installer could not be launched.
    #[error("install spawn error: {0}")]
    InstallSpawn(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Short name of the pipeline stage this error came from.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Parse(_) => "parse",
            Self::Download(_) => "download",
            Self::Integrity { .. } => "verify",
            Self::Stage(_) => "stage",
            Self::InstallSpawn(_) => "spawn",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, UpdateError>;
