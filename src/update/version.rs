//! Version comparison.
//!
//! The default comparator is a plain byte-ordinal string comparison, which is
//! what deployed manifests have always been checked against. It is NOT
//! semantic versioning: `"10.0.0"` sorts below `"9.0.0"`, and `"1.0.10"` below
//! `"1.0.9"`. Release numbering must keep components the same width for it to
//! behave. [`semver_needs_update`] is the correct comparator and can be opted
//! into with [`VersionPolicy::Semantic`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::warn;

/// Which comparator decides whether a remote version is newer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPolicy {
    /// Byte-ordinal string comparison (reference behavior).
    #[default]
    Lexicographic,
    /// Semantic version precedence via the `semver` crate.
    Semantic,
}

impl std::fmt::Display for VersionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexicographic => write!(f, "lexicographic"),
            Self::Semantic => write!(f, "semantic"),
        }
    }
}

impl VersionPolicy {
    /// Returns `true` when `remote` should replace `local` under this policy.
    pub fn needs_update(self, remote: &str, local: &str) -> bool {
        match self {
            Self::Lexicographic => needs_update(remote, local),
            Self::Semantic => match semver_cmp(remote, local) {
                Some(ordering) => ordering == Ordering::Greater,
                None => {
                    warn!(
                        remote,
                        local,
                        "version is not valid semver, falling back to string comparison"
                    );
                    needs_update(remote, local)
                }
            },
        }
    }
}

/// Lexicographic comparison: `true` iff `remote` sorts strictly after `local`.
pub fn needs_update(remote: &str, local: &str) -> bool {
    remote > local
}

/// Semantic version comparison: `true` iff `remote` has higher precedence.
///
/// Returns `false` when either side fails to parse.
pub fn semver_needs_update(remote: &str, local: &str) -> bool {
    semver_cmp(remote, local) == Some(Ordering::Greater)
}

fn semver_cmp(remote: &str, local: &str) -> Option<Ordering> {
    let remote = parse_semver(remote)?;
    let local = parse_semver(local)?;
    Some(remote.cmp_precedence(&local))
}

/// Parse a version, tolerating a leading `v` and surrounding whitespace.
fn parse_semver(raw: &str) -> Option<semver::Version> {
    let trimmed = raw.trim();
    let candidate = trimmed.strip_prefix('v').unwrap_or(trimmed);
    semver::Version::parse(candidate).ok()
}
