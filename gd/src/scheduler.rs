//! Scheduler - deterministic priority selection over ready packages
//!
//! Given free slots and the current state, picks the next packages to
//! launch. Nodes whose completion unblocks the most work go first, deep
//! nodes wait, leaves get a small bonus to shorten critical-path tails,
//! and previously failed packages are deprioritized so healthy work
//! proceeds.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::checker::DependencyChecker;
use crate::domain::{DependencyGraph, ExecutionState};

/// Priority-based selector over `state.ready`
pub struct Scheduler {
    checker: DependencyChecker,
}

impl Scheduler {
    /// Create a scheduler for a graph
    pub fn new(graph: Arc<DependencyGraph>) -> Self {
        Self {
            checker: DependencyChecker::new(graph),
        }
    }

    /// Deterministic launch priority for a package
    ///
    /// `100 * dependents - 10 * depth + 5 leaf bonus - 50 * prior failures`
    pub fn priority(&mut self, name: &str, retry_counts: &BTreeMap<String, u32>) -> i64 {
        let dependents = self.checker.dependent_count(name) as i64;
        let depth = self.checker.depth(name) as i64;
        let leaf_bonus = if self.checker.has_dependents(name) { 0 } else { 5 };
        let prior_failures = retry_counts.get(name).copied().unwrap_or(0) as i64;

        100 * dependents - 10 * depth + leaf_bonus - 50 * prior_failures
    }

    /// Up to `free_slots` names from `state.ready`, by non-increasing
    /// priority with ties broken by insertion order
    pub fn select_next(
        &mut self,
        free_slots: usize,
        state: &ExecutionState,
        retry_counts: &BTreeMap<String, u32>,
    ) -> Vec<String> {
        if free_slots == 0 || state.ready.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(String, i64)> = state
            .ready
            .iter()
            .map(|name| (name.clone(), self.priority(name, retry_counts)))
            .collect();

        // Stable sort keeps ready-insertion order for equal priorities
        scored.sort_by_key(|(_, priority)| Reverse(*priority));

        let picked: Vec<String> = scored.into_iter().take(free_slots).map(|(name, _)| name).collect();
        debug!(count = picked.len(), free_slots, "Scheduler::select_next: picked");
        picked
    }

    /// Pending names that become ready as soon as the in-flight set drains
    ///
    /// A name qualifies when every non-running dependency is completed.
    pub fn predict_next_ready(&self, state: &ExecutionState) -> Vec<String> {
        let running: HashSet<&str> = state.running.iter().map(|r| r.name.as_str()).collect();

        state
            .pending
            .iter()
            .filter(|name| {
                self.checker
                    .graph()
                    .dependencies_of(name)
                    .iter()
                    .all(|dep| state.completed.contains(dep) || running.contains(dep.as_str()))
            })
            .cloned()
            .collect()
    }

    /// The checker this scheduler consults
    pub fn checker(&mut self) -> &mut DependencyChecker {
        &mut self.checker
    }
}
