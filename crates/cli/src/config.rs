//! Configuration management for the CLI
//!
//! Settings come from an optional TOML file and `SCOUT_*` environment
//! variables; command-line flags are applied on top by each command.

use anyhow::{Context, Result};
use scout_lib::SpyConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File and environment settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default namespace
    pub namespace: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub redraw_interval_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
    pub shutdown_timeout_secs: Option<u64>,
}

impl Settings {
    /// Load settings from `path` (must exist) or the default config file
    /// (optional), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = Self::config_path() {
                    builder = builder.add_source(config::File::from(default_path).required(false));
                }
            }
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("SCOUT"))
            .build()
            .context("Failed to load configuration")?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Get the configuration file path
    fn config_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".config").join("scout").join("config.toml"))
    }

    /// Run configuration with these settings over the defaults
    pub fn spy_config(&self) -> SpyConfig {
        let defaults = SpyConfig::default();
        let secs = |value: Option<u64>, default: Duration| value.map(Duration::from_secs).unwrap_or(default);

        SpyConfig {
            namespace: self.namespace.clone(),
            poll_interval: secs(self.poll_interval_secs, defaults.poll_interval),
            redraw_interval: secs(self.redraw_interval_secs, defaults.redraw_interval),
            fetch_timeout: secs(self.fetch_timeout_secs, defaults.fetch_timeout),
            max_consecutive_failures: self
                .max_consecutive_failures
                .unwrap_or(defaults.max_consecutive_failures),
            shutdown_timeout: secs(self.shutdown_timeout_secs, defaults.shutdown_timeout),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_settings_keep_defaults() {
        let config = Settings::default().spy_config();
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.redraw_interval, Duration::from_secs(1));
        assert_eq!(config.namespace(), "default");
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "namespace = \"payments\"\npoll_interval_secs = 5\nmax_consecutive_failures = 10\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.namespace.as_deref(), Some("payments"));

        let config = settings.spy_config();
        assert_eq!(config.namespace(), "payments");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_consecutive_failures, 10);
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
