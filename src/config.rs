//! Configuration module for Stackform
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/stackform/stackform.toml)
//! - User configuration (~/.stackform.toml)
//! - Project configuration (./stackform.toml)
//! - Environment variables
//! - Command-line arguments (applied by the command context)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use stackform::retry::{BackoffStrategy, JitterStrategy, RetryPolicy};
use stackform::stack::{DEFAULT_ACCOUNT, DEFAULT_REGION};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default settings
    pub defaults: Defaults,

    /// Provider call retries
    pub retry: RetryConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Colors and output settings
    pub colors: ColorsConfig,
}

/// Default configuration values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Target account id
    pub account: String,

    /// Target region
    pub region: String,

    /// Directory holding stack state and the sandbox control plane
    pub state_dir: PathBuf,

    /// Concurrent provider calls per wave
    pub parallelism: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            account: DEFAULT_ACCOUNT.to_string(),
            region: DEFAULT_REGION.to_string(),
            state_dir: PathBuf::from(".stackform"),
            parallelism: 4,
        }
    }
}

/// Retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay_ms: u64,

    /// Upper bound on any delay
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 200,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with full jitter, bounded by these settings.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.max_retries)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .backoff(BackoffStrategy::Exponential { multiplier: 2.0 })
            .jitter(JitterStrategy::Full)
            .build()
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used when neither `RUST_LOG` nor `-v` is given
    pub level: String,

    /// `text` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "text".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Whether log lines should be JSON objects.
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// Colors configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorsConfig {
    /// Enable colors
    pub enabled: bool,
}

impl Default for ColorsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::default();

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                config = config.merge_from_file(&path)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        // An explicit path (flag or STACKFORM_CONFIG) replaces the search list
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }

        let mut paths = vec![PathBuf::from("/etc/stackform/stackform.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".stackform.toml"));
        }
        paths.push(PathBuf::from("stackform.toml"));
        paths
    }

    /// Merge configuration from a file
    fn merge_from_file(&self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let file_config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        Ok(self.merge(file_config))
    }

    /// Merge another config into this one; non-default values in `other` win
    fn merge(&self, other: Config) -> Config {
        let defaults = Defaults::default();
        let retry = RetryConfig::default();
        let logging = LoggingConfig::default();

        fn pick<T: PartialEq + Clone>(other: T, base: &T, default: &T) -> T {
            if &other != default {
                other
            } else {
                base.clone()
            }
        }

        Config {
            defaults: Defaults {
                account: pick(other.defaults.account, &self.defaults.account, &defaults.account),
                region: pick(other.defaults.region, &self.defaults.region, &defaults.region),
                state_dir: pick(
                    other.defaults.state_dir,
                    &self.defaults.state_dir,
                    &defaults.state_dir,
                ),
                parallelism: pick(
                    other.defaults.parallelism,
                    &self.defaults.parallelism,
                    &defaults.parallelism,
                ),
            },
            retry: RetryConfig {
                max_retries: pick(other.retry.max_retries, &self.retry.max_retries, &retry.max_retries),
                initial_delay_ms: pick(
                    other.retry.initial_delay_ms,
                    &self.retry.initial_delay_ms,
                    &retry.initial_delay_ms,
                ),
                max_delay_ms: pick(
                    other.retry.max_delay_ms,
                    &self.retry.max_delay_ms,
                    &retry.max_delay_ms,
                ),
            },
            logging: LoggingConfig {
                level: pick(other.logging.level, &self.logging.level, &logging.level),
                format: pick(other.logging.format, &self.logging.format, &logging.format),
            },
            colors: ColorsConfig {
                enabled: self.colors.enabled && other.colors.enabled,
            },
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // STACKFORM_ACCOUNT
        if let Ok(account) = std::env::var("STACKFORM_ACCOUNT") {
            self.defaults.account = account;
        }

        // STACKFORM_REGION
        if let Ok(region) = std::env::var("STACKFORM_REGION") {
            self.defaults.region = region;
        }

        // STACKFORM_STATE_DIR
        if let Ok(dir) = std::env::var("STACKFORM_STATE_DIR") {
            self.defaults.state_dir = PathBuf::from(dir);
        }

        // STACKFORM_PARALLELISM
        if let Ok(parallelism) = std::env::var("STACKFORM_PARALLELISM") {
            if let Ok(n) = parallelism.parse() {
                self.defaults.parallelism = n;
            }
        }

        // NO_COLOR
        if std::env::var("NO_COLOR").is_ok() {
            self.colors.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.defaults.account, "123456789012");
        assert_eq!(config.defaults.region, "ca-central-1");
        assert_eq!(config.defaults.parallelism, 4);
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.colors.enabled);
        assert!(!config.logging.is_json());
    }

    #[test]
    fn test_config_merge() {
        let base = Config {
            defaults: Defaults {
                region: "us-east-1".into(),
                ..Defaults::default()
            },
            ..Config::default()
        };
        let other = Config {
            defaults: Defaults {
                parallelism: 8,
                ..Defaults::default()
            },
            ..Config::default()
        };

        let merged = base.merge(other);
        assert_eq!(merged.defaults.parallelism, 8);
        assert_eq!(merged.defaults.region, "us-east-1");
    }

    #[test]
    fn test_load_toml_and_yaml() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("stackform.toml");
        let mut file = std::fs::File::create(&toml_path).unwrap();
        writeln!(file, "[defaults]\nregion = \"eu-west-1\"\n\n[logging]\nformat = \"json\"").unwrap();
        let config = Config::default().merge_from_file(&toml_path).unwrap();
        assert_eq!(config.defaults.region, "eu-west-1");
        assert!(config.logging.is_json());

        let yaml_path = dir.path().join("stackform.yaml");
        std::fs::write(&yaml_path, "retry:\n  max_retries: 7\n").unwrap();
        let config = Config::default().merge_from_file(&yaml_path).unwrap();
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.retry.policy().max_retries, 7);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "defaults = [").unwrap();
        assert!(Config::default().merge_from_file(&path).is_err());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("STACKFORM_PARALLELISM", "12");
        std::env::set_var("STACKFORM_REGION", "us-west-2");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.defaults.parallelism, 12);
        assert_eq!(config.defaults.region, "us-west-2");
        std::env::remove_var("STACKFORM_PARALLELISM");
        std::env::remove_var("STACKFORM_REGION");
    }
}
