//! Dependency checker - pure queries over a graph and an execution state
//!
//! No mutation of state ever happens here; the pool and recovery manager
//! ask questions and apply the answers themselves.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::domain::{DependencyGraph, ExecutionState};

/// Readiness, depth, and dependent queries over a dependency graph
pub struct DependencyChecker {
    graph: Arc<DependencyGraph>,
    /// Memoized longest-path depth per package
    depth_cache: HashMap<String, usize>,
}

impl DependencyChecker {
    /// Create a checker over a graph
    pub fn new(graph: Arc<DependencyGraph>) -> Self {
        Self {
            graph,
            depth_cache: HashMap::new(),
        }
    }

    /// The graph under query
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// True iff every direct dependency of `name` is completed
    ///
    /// A dependency in `failed` or `skipped` leaves the package not ready;
    /// cascade handling will skip it rather than wait on it.
    pub fn is_ready(&self, name: &str, state: &ExecutionState) -> bool {
        self.graph
            .dependencies_of(name)
            .iter()
            .all(|dep| state.completed.contains(dep))
    }

    /// Number of packages that directly depend on `name`
    pub fn dependent_count(&self, name: &str) -> usize {
        self.graph.dependents_of(name).len()
    }

    /// Whether `name` has any direct dependencies
    pub fn has_dependencies(&self, name: &str) -> bool {
        !self.graph.dependencies_of(name).is_empty()
    }

    /// Whether any package depends on `name`
    pub fn has_dependents(&self, name: &str) -> bool {
        !self.graph.dependents_of(name).is_empty()
    }

    /// Longest path from `name` back to a root; 0 for roots
    pub fn depth(&mut self, name: &str) -> usize {
        if let Some(&depth) = self.depth_cache.get(name) {
            return depth;
        }

        let graph = self.graph.clone();
        let depth = graph
            .dependencies_of(name)
            .iter()
            .map(|dep| self.depth(dep) + 1)
            .max()
            .unwrap_or(0);

        self.depth_cache.insert(name.to_string(), depth);
        depth
    }

    /// Direct dependents of `name` currently in pending or ready
    pub fn blocked_packages(&self, name: &str, state: &ExecutionState) -> Vec<String> {
        self.graph
            .dependents_of(name)
            .iter()
            .filter(|dep| {
                state.pending.iter().any(|n| n == *dep) || state.ready.iter().any(|n| n == *dep)
            })
            .cloned()
            .collect()
    }

    /// Transitive closure of reverse edges from `name` (BFS order, deduped)
    pub fn find_all_dependents(&self, name: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&str> = self.graph.dependents_of(name).iter().map(String::as_str).collect();
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            result.push(current.to_string());
            for next in self.graph.dependents_of(current) {
                queue.push_back(next);
            }
        }

        result
    }

    /// Pending names whose dependencies are all completed, in pending order
    pub fn newly_ready(&self, state: &ExecutionState) -> Vec<String> {
        state
            .pending
            .iter()
            .filter(|name| self.is_ready(name, state))
            .cloned()
            .collect()
    }
}
