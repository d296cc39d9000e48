//! Immutable build metadata.
//!
//! Commit and branch are injected at compile time through the
//! `KEEL_BUILD_COMMIT` / `KEEL_BUILD_BRANCH` environment variables. The
//! struct is built once at startup and passed to whoever needs it.

use serde::Serialize;

/// Placeholder used when a build variable was not provided.
pub const UNKNOWN: &str = "unknown";

/// Version and source-control metadata for the running binary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    /// Crate version (`CARGO_PKG_VERSION`).
    pub version: String,
    /// Git commit hash.
    pub commit: String,
    /// Git branch.
    pub branch: String,
}

impl BuildInfo {
    /// Build info for this compilation unit.
    pub fn current() -> Self {
        Self::new(
            env!("CARGO_PKG_VERSION"),
            option_env!("KEEL_BUILD_COMMIT"),
            option_env!("KEEL_BUILD_BRANCH"),
        )
    }

    /// Construct from explicit values, substituting [`UNKNOWN`] for gaps.
    pub fn new(version: &str, commit: Option<&str>, branch: Option<&str>) -> Self {
        let or_unknown = |v: Option<&str>| {
            v.filter(|s| !s.is_empty())
                .map_or_else(|| UNKNOWN.to_string(), String::from)
        };
        Self {
            version: version.to_string(),
            commit: or_unknown(commit),
            branch: or_unknown(branch),
        }
    }

    /// Short commit hash (first 8 characters).
    pub fn short_commit(&self) -> &str {
        self.commit.get(..8).unwrap_or(&self.commit)
    }
}

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}@{})", self.version, self.short_commit(), self.branch)
    }
}
