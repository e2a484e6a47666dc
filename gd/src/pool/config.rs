//! Pool configuration

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

/// Configuration for a pool run
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum in-flight operations (floored at 1)
    pub max_concurrency: usize,

    /// Label of the command being run (display + checkpoint)
    pub command: String,

    /// Opaque caller configuration, snapshotted into the checkpoint
    pub config_snapshot: Value,

    /// Directory holding the checkpoint artifact
    pub checkpoint_dir: PathBuf,

    /// Resume from an existing checkpoint when present
    pub continue_run: bool,

    /// Attempts allowed per package before a failure is permanent
    pub max_retries: u32,

    /// First retry backoff
    pub initial_retry_delay: Duration,

    /// Backoff ceiling
    pub max_retry_delay: Duration,

    /// Exponential backoff factor
    pub backoff_multiplier: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            command: String::new(),
            config_snapshot: Value::Null,
            checkpoint_dir: PathBuf::from("."),
            continue_run: false,
            max_retries: 3,
            initial_retry_delay: Duration::from_millis(5_000),
            max_retry_delay: Duration::from_millis(60_000),
            backoff_multiplier: 2.0,
        }
    }
}
