//! Configuration management
//!
//! Handles loading and validation of configuration from TOML files. Every
//! field has a default, so an empty file is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod types;

pub use types::{LoggingConfig, SelectionConfig};

/// Bounds for every individual wait, in milliseconds
const WINDOW_RANGE_MS: std::ops::RangeInclusive<u64> = 1..=1000;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Selection protocol configuration
    pub selection: SelectionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Load from [`default_path`](Self::default_path) if it exists, else defaults
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/lamco-selection/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lamco-selection").join("config.toml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let selection = &self.selection;

        for (name, value) in [
            ("first_reply_window_ms", selection.first_reply_window_ms),
            ("drain_window_ms", selection.drain_window_ms),
            ("clear_ack_timeout_ms", selection.clear_ack_timeout_ms),
            ("ownership_timeout_ms", selection.ownership_timeout_ms),
            ("handoff_timeout_ms", selection.handoff_timeout_ms),
        ] {
            if !WINDOW_RANGE_MS.contains(&value) {
                anyhow::bail!(
                    "{} ({}) must be between {} and {}",
                    name,
                    value,
                    WINDOW_RANGE_MS.start(),
                    WINDOW_RANGE_MS.end()
                );
            }
        }

        // A caller must never give up on a worker that is still inside a bounded wait
        let get_bound = selection.first_reply_window_ms + selection.drain_window_ms;
        let set_bound = selection.clear_ack_timeout_ms
            + selection.ownership_timeout_ms
            + selection.handoff_timeout_ms;
        let covered = get_bound.max(set_bound);
        if selection.command_timeout_ms <= covered {
            anyhow::bail!(
                "command_timeout_ms ({}) must exceed the worker wait bounds ({})",
                selection.command_timeout_ms,
                covered
            );
        }

        for (name, retry) in [
            ("ownership_retry", &selection.ownership_retry),
            ("store_open_retry", &selection.store_open_retry),
        ] {
            if retry.initial_delay_ms > retry.max_delay_ms {
                anyhow::bail!(
                    "{}: initial_delay_ms ({}) cannot be greater than max_delay_ms ({})",
                    name,
                    retry.initial_delay_ms,
                    retry.max_delay_ms
                );
            }
        }

        if selection.client_name.trim().is_empty() {
            anyhow::bail!("client_name cannot be empty");
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            _ => anyhow::bail!("Invalid log format: {}", self.logging.format),
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.logging.level),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.selection.first_reply_window_ms, 50);
        assert_eq!(config.selection.handoff_timeout_ms, 500);
        assert_eq!(config.selection.client_name, "lamco-selection");
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[selection]\ndrain_window_ms = 20\nclient_name = \"editor\"\n\n\
             [logging]\nformat = \"json\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.selection.drain_window_ms, 20);
        assert_eq!(config.selection.first_reply_window_ms, 50);
        assert_eq!(config.selection.client_name, "editor");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[selection]\nfirst_reply_window_ms = 0").unwrap();

        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_config_validation_command_timeout() {
        let mut config = Config::default();
        config.selection.command_timeout_ms = 600;
        assert!(config.validate().is_err());

        config.selection.command_timeout_ms = 651;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_logging() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_client_name() {
        let mut config = Config::default();
        config.selection.client_name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_path() {
        if let Some(path) = Config::default_path() {
            assert!(path.ends_with("lamco-selection/config.toml"));
        }
    }
}
