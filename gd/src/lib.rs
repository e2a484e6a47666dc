//! GraphDrive - dependency-aware parallel command executor
//!
//! GraphDrive runs a user-supplied command against every node of a package
//! dependency graph: topological order, bounded parallelism, retries with
//! backoff, checkpoint-resume, and cascade of permanent failures to
//! dependents. A persisted checkpoint can be operated on offline through
//! the recovery manager.
//!
//! # Core pieces
//!
//! - [`domain`] - packages, the dependency graph, execution state
//! - [`checker`] - readiness/depth/dependent queries
//! - [`scheduler`] - deterministic priority selection over ready packages
//! - [`pool`] - the driver loop, resource monitor, and retry policy
//! - [`checkpoint`] - the durable run artifact and its manager
//! - [`recovery`] - offline checkpoint surgery and status reporting
//! - [`events`] - broadcast observability for runs
//! - [`runner`] - the shell-command operation injected by the CLI
//! - [`config`] / [`cli`] - the thin CLI glue

pub mod cascade;
pub mod checker;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod pool;
pub mod recovery;
pub mod runner;
pub mod scheduler;

// Re-export commonly used types
pub use checker::DependencyChecker;
pub use checkpoint::{CHECKPOINT_DIR, CHECKPOINT_FILE, Checkpoint, CheckpointError, CheckpointManager, SCHEMA_VERSION};
pub use config::{ConcurrencyConfig, Config, Manifest, RetryConfig};
pub use domain::{
    DependencyGraph, ExecutionMetrics, ExecutionResult, ExecutionState, FailedPackage, GraphError, GraphSnapshot,
    Package, PackageResult, PackageTiming, Partition, PublishedVersion, RunningPackage,
};
pub use events::{EventBus, EventEmitter, PoolEvent};
pub use pool::{
    DynamicTaskPool, MonitorMetrics, PackageOperation, PoolConfig, PoolError, RETRIABLE_PATTERNS, ResourceMonitor,
    RetryClassifier,
};
pub use recovery::{RecoveryError, RecoveryManager, RecoveryOptions, RetryOptions, StateValidation};
pub use runner::ShellOperation;
pub use scheduler::Scheduler;
