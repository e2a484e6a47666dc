//! The dynamic task pool and its supporting pieces
//!
//! - [`core`] - the driver loop composing scheduler, monitor, checkpoints,
//!   and the injected operation
//! - [`monitor`] - slot accounting with telemetry
//! - [`retry`] - transient-failure classification and backoff
//! - [`config`] - run configuration

mod config;
mod core;
mod monitor;
mod retry;

pub use config::PoolConfig;
pub use core::{DynamicTaskPool, PackageOperation, PoolError};
pub use monitor::{MonitorMetrics, ResourceMonitor};
pub use retry::{RETRIABLE_PATTERNS, RetryClassifier, retry_delay};
