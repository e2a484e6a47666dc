//! Execution state - the partitioned view of a run
//!
//! Every package in the graph lives in exactly one of six partitions:
//! pending, ready, running, completed, failed, skipped. The pool owns the
//! live state and is the only mutator during a run; the recovery manager
//! mutates it offline through a persisted checkpoint.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::graph::DependencyGraph;

/// Which partition a package currently occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// A package currently executing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningPackage {
    pub name: String,
    pub started_at: DateTime<Utc>,
    /// Updated on each checkpoint save
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl RunningPackage {
    /// Start tracking a package now
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            elapsed_ms: 0,
        }
    }
}

/// Snapshot of a permanent failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPackage {
    pub name: String,
    pub error: String,
    #[serde(default)]
    pub stack: Option<String>,
    pub retriable: bool,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub dependents: Vec<String>,
}

/// Partitioned execution state over a package graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Awaiting readiness, in build order
    pub pending: Vec<String>,
    /// Dependencies complete, not yet launched
    pub ready: Vec<String>,
    /// In flight
    pub running: Vec<RunningPackage>,
    /// Operation succeeded
    pub completed: BTreeSet<String>,
    /// Permanent failures
    pub failed: Vec<FailedPackage>,
    /// Blocked by a failure or user action
    pub skipped: BTreeSet<String>,
}

impl ExecutionState {
    /// Fresh state for a graph: everything pending, in build order
    pub fn for_graph(graph: &DependencyGraph) -> Self {
        Self {
            pending: graph.build_order(),
            ..Default::default()
        }
    }

    /// All partitions a name appears in (more than one indicates corruption)
    pub fn partitions_of(&self, name: &str) -> Vec<Partition> {
        let mut found = Vec::new();
        if self.pending.iter().any(|n| n == name) {
            found.push(Partition::Pending);
        }
        if self.ready.iter().any(|n| n == name) {
            found.push(Partition::Ready);
        }
        if self.running.iter().any(|r| r.name == name) {
            found.push(Partition::Running);
        }
        if self.completed.contains(name) {
            found.push(Partition::Completed);
        }
        if self.failed.iter().any(|f| f.name == name) {
            found.push(Partition::Failed);
        }
        if self.skipped.contains(name) {
            found.push(Partition::Skipped);
        }
        found
    }

    /// The partition a name occupies, if tracked at all
    pub fn partition_of(&self, name: &str) -> Option<Partition> {
        self.partitions_of(name).into_iter().next()
    }

    /// Whether the name is tracked in any partition
    pub fn contains(&self, name: &str) -> bool {
        self.partition_of(name).is_some()
    }

    /// Names currently running
    pub fn running_names(&self) -> Vec<String> {
        self.running.iter().map(|r| r.name.clone()).collect()
    }

    /// Names currently failed
    pub fn failed_names(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.name.clone()).collect()
    }

    /// Total tracked names across all partitions (with duplicates, if any)
    pub fn tracked_count(&self) -> usize {
        self.pending.len()
            + self.ready.len()
            + self.running.len()
            + self.completed.len()
            + self.failed.len()
            + self.skipped.len()
    }

    /// Remove a name from `pending`; true if it was there
    pub fn remove_pending(&mut self, name: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|n| n != name);
        self.pending.len() != before
    }

    /// Remove a name from `ready`; true if it was there
    pub fn remove_ready(&mut self, name: &str) -> bool {
        let before = self.ready.len();
        self.ready.retain(|n| n != name);
        self.ready.len() != before
    }

    /// Remove a name from `running`, returning its entry
    pub fn remove_running(&mut self, name: &str) -> Option<RunningPackage> {
        let idx = self.running.iter().position(|r| r.name == name)?;
        Some(self.running.remove(idx))
    }

    /// Remove a name from `failed`, returning its snapshot
    pub fn remove_failed(&mut self, name: &str) -> Option<FailedPackage> {
        let idx = self.failed.iter().position(|f| f.name == name)?;
        Some(self.failed.remove(idx))
    }

    /// Remove a name from every partition
    pub fn remove_everywhere(&mut self, name: &str) {
        self.remove_pending(name);
        self.remove_ready(name);
        self.remove_running(name);
        self.completed.remove(name);
        self.remove_failed(name);
        self.skipped.remove(name);
    }

    /// Whether the run has nothing left to do
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.ready.is_empty() && self.running.is_empty()
    }
}
