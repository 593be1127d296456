//! `proofgate.toml` configuration
//!
//! Every field has a default, so a missing file and an empty file behave the
//! same way.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::verify::diff::DiffPolicy;

pub const CONFIG_FILE_NAME: &str = "proofgate.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub timeouts: TimeoutConfig,
    pub diff: DiffPolicy,
    pub browser: BrowserConfig,
    pub database: DatabaseConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

/// Per-gate timeouts, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub test_secs: u64,
    pub preflight_secs: u64,
    pub diff_secs: u64,
    pub http_secs: u64,
    pub browser_secs: u64,
    pub database_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            test_secs: 300,
            preflight_secs: 5,
            diff_secs: 30,
            http_secs: 5,
            browser_secs: 30,
            database_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn test(&self) -> Duration {
        Duration::from_secs(self.test_secs)
    }

    pub fn preflight(&self) -> Duration {
        Duration::from_secs(self.preflight_secs)
    }

    pub fn diff(&self) -> Duration {
        Duration::from_secs(self.diff_secs)
    }
}

/// Browser driver command.
///
/// `{url}` and `{output}` are replaced with the shell-escaped page URL and
/// screenshot path. The command must write the screenshot to `{output}` and
/// print the rendered page text on stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub command: Option<String>,
}

/// Database client command; `{database}` and `{query}` are replaced with
/// shell-escaped values. Rows are read from stdout, one per line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".proofgate"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Load `proofgate.toml` from `dir` if present, defaults otherwise
    pub fn discover(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.timeouts.test_secs, 300);
        assert_eq!(config.timeouts.http_secs, 5);
        assert!(config.diff.protect_test_files);
        assert!(config.diff.require_changes);
        assert_eq!(config.store.dir, PathBuf::from(".proofgate"));
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_partial_config_overrides() {
        let config = Config::parse(
            r#"
[timeouts]
test_secs = 60

[diff]
forbidden_paths = [".github/**", "Cargo.lock"]
require_changes = false

[database]
command = "sqlite3 {database} {query}"
"#,
        )
        .unwrap();
        assert_eq!(config.timeouts.test_secs, 60);
        assert_eq!(config.timeouts.preflight_secs, 5);
        assert_eq!(config.diff.forbidden_paths.len(), 2);
        assert!(!config.diff.require_changes);
        assert!(config.diff.protect_test_files);
        assert_eq!(
            config.database.command.as_deref(),
            Some("sqlite3 {database} {query}")
        );
        assert!(config.browser.command.is_none());
    }

    #[test]
    fn test_discover_without_file() {
        let temp = tempfile::tempdir().unwrap();
        assert_eq!(Config::discover(temp.path()).unwrap(), Config::default());
    }

    #[test]
    fn test_discover_reads_file() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "[store]\ndir = \"audit\"\n",
        )
        .unwrap();
        let config = Config::discover(temp.path()).unwrap();
        assert_eq!(config.store.dir, PathBuf::from("audit"));
    }

    #[test]
    fn test_invalid_config_is_error() {
        assert!(Config::parse("[timeouts]\ntest_secs = \"soon\"\n").is_err());
    }
}
