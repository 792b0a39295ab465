//! Well-known paths inside a workspace's state directory.

use std::path::{Path, PathBuf};

/// Name of the state directory at the workspace root.
pub const STATE_DIR: &str = ".envkit";

/// Files the engine keeps under [`STATE_DIR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatePath {
    /// Durable record of installed extensions and their resource claims
    Manifest,
    /// Lock file guarding manifest read-modify-write
    ManifestLock,
    /// Append-only JSON-lines audit log
    AuditLog,
    /// Persisted rate-limit buckets
    RateLimit,
    /// Lock file guarding rate-limit buckets
    RateLimitLock,
    /// Optional engine configuration
    Config,
}

impl StatePath {
    /// File name of this path inside the state directory.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manifest => "manifest.toml",
            Self::ManifestLock => "manifest.lock",
            Self::AuditLog => "audit.jsonl",
            Self::RateLimit => "ratelimit.json",
            Self::RateLimitLock => "ratelimit.lock",
            Self::Config => "config.toml",
        }
    }

    /// Resolve this path for the workspace rooted at `workspace`.
    pub fn under(&self, workspace: &Path) -> PathBuf {
        workspace.join(STATE_DIR).join(self.as_str())
    }
}

impl std::fmt::Display for StatePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
