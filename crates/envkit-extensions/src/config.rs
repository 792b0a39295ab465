//! Engine configuration from `.envkit/config.toml`.

use std::path::Path;
use std::time::Duration;

use envkit_catalog::ExtensionDefinition;
use envkit_fs::{ConfigStore, StatePath};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tunables for a workspace. Every field has a default, so an absent or
/// partial config file is valid.
///
/// ```toml
/// lock_timeout_ms = 5000
/// shell = "sh"
///
/// [rate_limit]
/// max_operations = 20
/// window_secs = 600
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded wait for the manifest and rate-limit locks.
    pub lock_timeout_ms: u64,
    pub rate_limit: RateLimitConfig,
    pub default_install_timeout_secs: u64,
    pub default_validation_timeout_secs: u64,
    pub hook_timeout_secs: u64,
    /// Lines of stderr kept in install failures.
    pub stderr_tail_lines: usize,
    /// Interpreter for scripts that do not name one.
    pub shell: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 10_000,
            rate_limit: RateLimitConfig::default(),
            default_install_timeout_secs: 300,
            default_validation_timeout_secs: 30,
            hook_timeout_secs: 600,
            stderr_tail_lines: 20,
            shell: "bash".to_string(),
        }
    }
}

/// Per-actor budget for mutating operations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_operations: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_operations: 10,
            window_secs: 300,
        }
    }
}

impl EngineConfig {
    /// Load the workspace config, falling back to defaults when the file
    /// does not exist.
    pub fn load(workspace: &Path) -> Result<Self> {
        let path = StatePath::Config.under(workspace);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No engine config, using defaults");
            return Ok(Self::default());
        }
        Ok(ConfigStore::new().load(&path)?)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }

    /// Install bound for `def`, preferring its own declaration.
    pub fn install_timeout(&self, def: &ExtensionDefinition) -> Duration {
        Duration::from_secs(
            def.install
                .timeout_sec
                .unwrap_or(self.default_install_timeout_secs),
        )
    }

    /// Removal bound for `def`, preferring its own declaration.
    pub fn remove_timeout(&self, def: &ExtensionDefinition) -> Duration {
        Duration::from_secs(
            def.remove
                .as_ref()
                .and_then(|r| r.timeout_sec)
                .unwrap_or(self.default_install_timeout_secs),
        )
    }

    /// Validation bound for `def`, preferring its own declaration.
    pub fn validation_timeout(&self, def: &ExtensionDefinition) -> Duration {
        Duration::from_secs(
            def.validation
                .timeout_sec
                .unwrap_or(self.default_validation_timeout_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.lock_timeout(), Duration::from_secs(10));
        assert_eq!(config.rate_limit.max_operations, 10);
        assert_eq!(config.rate_window(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = StatePath::Config.under(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "shell = \"sh\"\n\n[rate_limit]\nmax_operations = 3\n").unwrap();

        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config.shell, "sh");
        assert_eq!(config.rate_limit.max_operations, 3);
        assert_eq!(config.rate_limit.window_secs, 300);
        assert_eq!(config.stderr_tail_lines, 20);
    }

    #[test]
    fn test_definition_timeout_wins() {
        let config = EngineConfig::default();
        let def = envkit_test_utils::ExtensionBuilder::new("x")
            .install_timeout(7)
            .build();
        assert_eq!(config.install_timeout(&def), Duration::from_secs(7));
        assert_eq!(config.validation_timeout(&def), Duration::from_secs(30));
    }
}
