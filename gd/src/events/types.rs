//! Event types emitted during a pool run

use serde::{Deserialize, Serialize};

/// Everything observable about a run
///
/// Events are advisory: correctness never depends on anyone consuming
/// them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PoolEvent {
    /// The pool has started (or resumed) an execution
    ExecutionStarted {
        execution_id: String,
        command: String,
        total_packages: usize,
        max_concurrency: usize,
    },

    /// A package operation has been launched
    PackageStarted { name: String, attempt: u32 },

    /// A package operation succeeded
    PackageCompleted { name: String, duration_ms: u64 },

    /// A package will be retried after a transient failure
    PackageRetrying {
        name: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    /// A package failed permanently
    PackageFailed {
        name: String,
        error: String,
        attempts: u32,
        retriable: bool,
    },

    /// A package was skipped because of an upstream failure
    PackageSkipped { name: String, reason: String },

    /// The execution state was persisted
    CheckpointSaved { path: String },

    /// The run finished
    ExecutionCompleted {
        execution_id: String,
        success: bool,
        completed: usize,
        failed: usize,
        skipped: usize,
        duration_ms: u64,
    },
}

impl PoolEvent {
    /// Stable event name for logs and listeners
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ExecutionStarted { .. } => "execution:started",
            Self::PackageStarted { .. } => "package:started",
            Self::PackageCompleted { .. } => "package:completed",
            Self::PackageRetrying { .. } => "package:retrying",
            Self::PackageFailed { .. } => "package:failed",
            Self::PackageSkipped { .. } => "package:skipped",
            Self::CheckpointSaved { .. } => "checkpoint:saved",
            Self::ExecutionCompleted { .. } => "execution:completed",
        }
    }

    /// The package this event concerns, if any
    pub fn package(&self) -> Option<&str> {
        match self {
            Self::PackageStarted { name, .. }
            | Self::PackageCompleted { name, .. }
            | Self::PackageRetrying { name, .. }
            | Self::PackageFailed { name, .. }
            | Self::PackageSkipped { name, .. } => Some(name),
            _ => None,
        }
    }
}
