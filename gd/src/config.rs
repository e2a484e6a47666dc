//! Configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::Package;
use crate::pool::PoolConfig;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Package manifest location
    pub manifest: PathBuf,

    /// Directory holding the checkpoint artifact
    #[serde(rename = "checkpoint-dir")]
    pub checkpoint_dir: PathBuf,

    /// Concurrency limits
    pub concurrency: ConcurrencyConfig,

    /// Retry tuning
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("graphdrive.yml"),
            checkpoint_dir: PathBuf::from("."),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .graphdrive.yml
        let local_config = PathBuf::from(".graphdrive.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/graphdrive/graphdrive.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("graphdrive").join("graphdrive.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Pool configuration for a run of `command`
    ///
    /// The whole config is snapshotted opaquely into the checkpoint.
    pub fn pool_config(&self, command: &str, continue_run: bool) -> PoolConfig {
        PoolConfig {
            max_concurrency: self.concurrency.max_packages,
            command: command.to_string(),
            config_snapshot: serde_json::to_value(self).unwrap_or(serde_json::Value::Null),
            checkpoint_dir: self.checkpoint_dir.clone(),
            continue_run,
            max_retries: self.retry.max_retries,
            initial_retry_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_retry_delay: Duration::from_millis(self.retry.max_delay_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
        }
    }
}

/// Concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum concurrent package operations
    #[serde(rename = "max-packages")]
    pub max_packages: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { max_packages: 4 }
    }
}

/// Retry tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per package before a failure is permanent
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds
    #[serde(rename = "initial-delay-ms")]
    pub initial_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff factor
    #[serde(rename = "backoff-multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 5_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Package manifest: the upstream discovery output, as a YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub packages: Vec<Package>,
}

impl Manifest {
    /// Load and parse a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).context(format!("Failed to read manifest {}", path.display()))?;
        let manifest: Self =
            serde_yaml::from_str(&content).context(format!("Failed to parse manifest {}", path.display()))?;

        tracing::info!(packages = manifest.packages.len(), "Loaded manifest from: {}", path.display());
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.manifest, PathBuf::from("graphdrive.yml"));
        assert_eq!(config.concurrency.max_packages, 4);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_delay_ms, 5_000);
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.yml");
        std::fs::write(
            &path,
            "checkpoint-dir: /tmp/work\nconcurrency:\n  max-packages: 8\nretry:\n  max-retries: 5\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();

        assert_eq!(config.checkpoint_dir, PathBuf::from("/tmp/work"));
        assert_eq!(config.concurrency.max_packages, 8);
        assert_eq!(config.retry.max_retries, 5);
        // Unspecified keys keep defaults
        assert_eq!(config.retry.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let path = PathBuf::from("/definitely/not/here.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_pool_config_carries_settings() {
        let config = Config::default();
        let pool = config.pool_config("publish", true);

        assert_eq!(pool.command, "publish");
        assert!(pool.continue_run);
        assert_eq!(pool.max_concurrency, 4);
        assert_eq!(pool.initial_retry_delay, Duration::from_secs(5));
        assert!(pool.config_snapshot.is_object());
    }

    #[test]
    fn test_manifest_parse() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("graphdrive.yml");
        std::fs::write(
            &path,
            "packages:\n  - name: util\n    version: 1.0.0\n    path: packages/util\n  - name: core\n    path: packages/core\n    dependencies: [util]\n",
        )
        .unwrap();

        let manifest = Manifest::load(&path).unwrap();

        assert_eq!(manifest.packages.len(), 2);
        assert_eq!(manifest.packages[1].dependencies, vec!["util".to_string()]);
    }
}
