//! Recovery manager - offline surgery on a persisted checkpoint
//!
//! Operates on a checkpoint without running anything: mark packages
//! completed, skip them (with cascade), reset them, requeue failures,
//! validate the partitions, and render a status report. Every mutation is
//! persisted before returning.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cascade::skip_package_tree;
use crate::checker::DependencyChecker;
use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointManager};
use crate::domain::DependencyGraph;

/// Errors from recovery operations
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Outcome of a state validation pass
#[derive(Debug, Clone)]
pub struct StateValidation {
    pub valid: bool,
    pub issues: Vec<String>,
}

/// Overrides for [`RecoveryManager::retry_failed`]
#[derive(Debug, Clone, Default)]
pub struct RetryOptions {
    /// When set, non-retriable failures are requeued too
    pub max_retries: Option<u32>,
}

/// Batch of recovery actions, applied in a fixed deterministic order
#[derive(Debug, Clone, Default)]
pub struct RecoveryOptions {
    pub reset_packages: Vec<String>,
    pub mark_completed: Vec<String>,
    pub skip_packages: Vec<String>,
    pub retry_failed: bool,
    pub skip_failed: bool,
}

/// Offline manipulator of a checkpoint + graph pair
pub struct RecoveryManager {
    graph: Arc<DependencyGraph>,
    checker: DependencyChecker,
    manager: CheckpointManager,
    checkpoint: Checkpoint,
}

impl RecoveryManager {
    /// Load the manager for a checkpoint directory; `None` without one
    pub async fn load(graph: Arc<DependencyGraph>, dir: impl AsRef<Path>) -> Result<Option<Self>, RecoveryError> {
        let manager = CheckpointManager::new(dir);
        let Some(checkpoint) = manager.load().await? else {
            debug!("RecoveryManager::load: no checkpoint present");
            return Ok(None);
        };

        Ok(Some(Self {
            checker: DependencyChecker::new(graph.clone()),
            graph,
            manager,
            checkpoint,
        }))
    }

    /// The checkpoint being operated on
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Delete the checkpoint artifact entirely
    pub async fn cleanup(self) -> Result<(), RecoveryError> {
        self.manager.cleanup().await?;
        Ok(())
    }

    fn ensure_known(&self, names: &[String]) -> Result<(), RecoveryError> {
        for name in names {
            if !self.graph.contains(name) {
                return Err(RecoveryError::PackageNotFound(name.clone()));
            }
        }
        Ok(())
    }

    fn sort_pending(&mut self) {
        let order: std::collections::HashMap<&str, usize> = self
            .checkpoint
            .build_order
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        self.checkpoint
            .state
            .pending
            .sort_by_key(|n| order.get(n.as_str()).copied().unwrap_or(usize::MAX));
    }

    /// Re-derive `ready` from the readiness of pending packages
    fn refresh_ready(&mut self) {
        let newly = self.checker.newly_ready(&self.checkpoint.state);
        for name in newly {
            self.checkpoint.state.remove_pending(&name);
            self.checkpoint.state.ready.push(name);
        }
    }

    async fn persist(&mut self) -> Result<(), RecoveryError> {
        let state = &self.checkpoint.state;
        self.checkpoint.can_recover =
            !(state.failed.is_empty() && state.skipped.is_empty() && state.is_drained());
        self.checkpoint.recovery_hints = generate_hints(&self.graph, &self.checkpoint);
        self.manager.save(&mut self.checkpoint).await?;
        Ok(())
    }

    /// Force packages into `completed`, applied in build order
    pub async fn mark_completed(&mut self, names: &[String]) -> Result<(), RecoveryError> {
        self.ensure_known(names)?;
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();

        for name in self.checkpoint.build_order.clone() {
            if wanted.contains(name.as_str()) {
                self.checkpoint.state.remove_everywhere(&name);
                self.checkpoint.state.completed.insert(name.clone());
                info!(package = %name, "Marked completed");
            }
        }

        self.refresh_ready();
        self.persist().await
    }

    /// Skip packages and all of their transitive dependents
    pub async fn skip_packages(&mut self, names: &[String]) -> Result<Vec<String>, RecoveryError> {
        self.ensure_known(names)?;

        let mut all_skipped = Vec::new();
        for name in names {
            let skipped = skip_package_tree(&self.checker, &mut self.checkpoint.state, name);
            info!(package = %name, cascade = skipped.len(), "Skipped");
            all_skipped.extend(skipped);
        }

        self.persist().await?;
        Ok(all_skipped)
    }

    /// Return a package to `pending`, forgetting its history
    pub async fn reset_package(&mut self, name: &str) -> Result<(), RecoveryError> {
        if !self.graph.contains(name) {
            return Err(RecoveryError::PackageNotFound(name.to_string()));
        }

        self.checkpoint.state.remove_everywhere(name);
        self.checkpoint.state.pending.push(name.to_string());
        self.sort_pending();
        self.checkpoint.retry_attempts.remove(name);
        self.checkpoint.timings.remove(name);
        info!(package = %name, "Reset to pending");

        self.persist().await
    }

    /// Requeue failed packages that are retriable (or overridden)
    ///
    /// Returns the names moved back to pending; non-retriable entries stay
    /// failed unless `options.max_retries` overrides.
    pub async fn retry_failed(&mut self, options: RetryOptions) -> Result<Vec<String>, RecoveryError> {
        let override_all = options.max_retries.is_some();
        let mut retried = Vec::new();

        let failed = std::mem::take(&mut self.checkpoint.state.failed);
        for entry in failed {
            if entry.retriable || override_all {
                self.checkpoint.retry_attempts.remove(&entry.name);
                self.checkpoint.state.pending.push(entry.name.clone());
                info!(package = %entry.name, "Requeued failed package");
                retried.push(entry.name);
            } else {
                self.checkpoint.state.failed.push(entry);
            }
        }

        self.sort_pending();
        self.refresh_ready();
        self.persist().await?;
        Ok(retried)
    }

    /// Convert every failure into a skip, cascading to dependents
    pub async fn skip_failed(&mut self) -> Result<Vec<String>, RecoveryError> {
        let names = self.checkpoint.state.failed_names();
        let mut all_skipped = Vec::new();

        for name in names {
            self.checkpoint.state.remove_failed(&name);
            let skipped = skip_package_tree(&self.checker, &mut self.checkpoint.state, &name);
            warn!(package = %name, cascade = skipped.len(), "Failed package skipped");
            all_skipped.extend(skipped);
        }

        self.persist().await?;
        Ok(all_skipped)
    }

    /// Check the checkpoint partitions against the graph
    pub fn validate_state(&self) -> StateValidation {
        validate_state(&self.graph, &self.checkpoint)
    }

    /// Heuristic next-step suggestions
    pub fn recovery_hints(&self) -> Vec<String> {
        generate_hints(&self.graph, &self.checkpoint)
    }

    /// Human-readable status report
    pub fn show_status(&self) -> String {
        let state = &self.checkpoint.state;
        let (done, total) = self.checkpoint.progress();

        let mut out = String::new();
        out.push_str("Parallel Execution Status\n");
        out.push_str(&format!("Command:   {}\n", self.checkpoint.command));
        out.push_str(&format!("Execution: {}\n", self.checkpoint.execution_id));
        out.push_str(&format!("Completed: {}/{}\n", done, total));
        out.push_str(&format!("Running:   {}\n", state.running.len()));
        out.push_str(&format!("Pending:   {}\n", state.pending.len() + state.ready.len()));
        out.push_str(&format!("Failed:    {}\n", state.failed.len()));
        out.push_str(&format!("Skipped:   {}\n", state.skipped.len()));

        for running in &state.running {
            out.push_str(&format!(
                "  running: {} (since {})\n",
                running.name,
                running.started_at.to_rfc3339()
            ));
        }
        for failed in &state.failed {
            out.push_str(&format!("  failed: {} - {}\n", failed.name, failed.error));
        }

        let hints = self.recovery_hints();
        if !hints.is_empty() {
            out.push_str("\nRecovery hints:\n");
            for hint in hints {
                out.push_str(&format!("  - {}\n", hint));
            }
        }

        out
    }

    /// Apply a batch of actions in the fixed order:
    /// reset, mark-completed, skip, retry-failed, skip-failed
    pub async fn apply_recovery_options(&mut self, options: &RecoveryOptions) -> Result<(), RecoveryError> {
        for name in &options.reset_packages {
            self.reset_package(name).await?;
        }
        if !options.mark_completed.is_empty() {
            self.mark_completed(&options.mark_completed).await?;
        }
        if !options.skip_packages.is_empty() {
            self.skip_packages(&options.skip_packages).await?;
        }
        if options.retry_failed {
            self.retry_failed(RetryOptions::default()).await?;
        }
        if options.skip_failed {
            self.skip_failed().await?;
        }
        Ok(())
    }
}

/// Validate a checkpoint's partitions against a graph
pub fn validate_state(graph: &DependencyGraph, checkpoint: &Checkpoint) -> StateValidation {
    let state = &checkpoint.state;
    let mut issues = Vec::new();

    let missing: Vec<&str> = graph.names().filter(|name| !state.contains(name)).collect();
    if !missing.is_empty() {
        issues.push(format!("Missing packages: {}", missing.join(", ")));
    }

    for name in graph.names() {
        let partitions = state.partitions_of(name);
        if partitions.len() > 1 {
            let listed: Vec<String> = partitions.iter().map(|p| p.to_string()).collect();
            issues.push(format!(
                "Package '{}' appears in multiple states: {}",
                name,
                listed.join(", ")
            ));
        }
    }

    let tracked: Vec<(String, &str)> = state
        .pending
        .iter()
        .map(|n| (n.clone(), "pending"))
        .chain(state.ready.iter().map(|n| (n.clone(), "ready")))
        .chain(state.running.iter().map(|r| (r.name.clone(), "running")))
        .chain(state.completed.iter().map(|n| (n.clone(), "completed")))
        .chain(state.failed.iter().map(|f| (f.name.clone(), "failed")))
        .chain(state.skipped.iter().map(|n| (n.clone(), "skipped")))
        .collect();
    for (name, partition) in tracked {
        if !graph.contains(&name) {
            issues.push(format!("Unknown package '{}' in state '{}'", name, partition));
        }
    }

    for failed in &state.failed {
        for dependent in &failed.dependents {
            if !graph.dependents_of(&failed.name).contains(dependent) {
                issues.push(format!(
                    "Failed package '{}' lists '{}' as a dependent, but the graph disagrees",
                    failed.name, dependent
                ));
            }
        }
    }

    StateValidation {
        valid: issues.is_empty(),
        issues,
    }
}

/// Heuristic recovery suggestions for a checkpoint
pub fn generate_hints(graph: &DependencyGraph, checkpoint: &Checkpoint) -> Vec<String> {
    let state = &checkpoint.state;
    let mut hints = Vec::new();

    if state.failed.iter().any(|f| f.retriable) {
        hints.push("Retriable failures present - rerun with --retry-failed to requeue them".to_string());
    }
    if state.failed.iter().any(|f| !f.retriable) {
        hints.push("Permanent failures present - use --skip-failed to unblock the rest".to_string());
    }

    let stuck_after = chrono::Duration::hours(1);
    for running in &state.running {
        if Utc::now() - running.started_at > stuck_after {
            hints.push(format!(
                "Package '{}' has been running for over an hour and may be stuck",
                running.name
            ));
        }
    }

    let validation = validate_state(graph, checkpoint);
    if !validation.valid {
        hints.push("Checkpoint state is inconsistent - use --reset <package> to rebuild affected entries".to_string());
    }

    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FailedPackage, Package, RunningPackage};
    use serde_json::Value;
    use tempfile::tempdir;

    fn graph() -> Arc<DependencyGraph> {
        Arc::new(
            DependencyGraph::build(vec![
                Package::new("a"),
                Package::new("b").with_dependency("a"),
                Package::new("c").with_dependency("b"),
            ])
            .unwrap(),
        )
    }

    fn failed_entry(name: &str, retriable: bool) -> FailedPackage {
        FailedPackage {
            name: name.to_string(),
            error: if retriable {
                "connect ETIMEDOUT".to_string()
            } else {
                "build failed".to_string()
            },
            stack: None,
            retriable,
            attempts: 3,
            failed_at: Utc::now(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }

    async fn manager_with(graph: Arc<DependencyGraph>, dir: &std::path::Path, checkpoint: Checkpoint) -> RecoveryManager {
        let store = CheckpointManager::new(dir);
        let mut checkpoint = checkpoint;
        store.save(&mut checkpoint).await.unwrap();
        RecoveryManager::load(graph, dir).await.unwrap().unwrap()
    }

    fn fresh_checkpoint(graph: &DependencyGraph) -> Checkpoint {
        Checkpoint::new(graph, "test", Value::Null, 2)
    }

    #[tokio::test]
    async fn test_load_returns_none_without_checkpoint() {
        let temp = tempdir().unwrap();
        let loaded = RecoveryManager::load(graph(), temp.path()).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_mark_completed_updates_ready() {
        let temp = tempdir().unwrap();
        let graph = graph();
        let mut manager = manager_with(graph.clone(), temp.path(), fresh_checkpoint(&graph)).await;

        manager.mark_completed(&["a".to_string()]).await.unwrap();

        let state = &manager.checkpoint().state;
        assert!(state.completed.contains("a"));
        // b became ready now that a is completed
        assert_eq!(state.ready, vec!["b".to_string()]);
        assert_eq!(state.pending, vec!["c".to_string()]);

        // Persisted immediately
        let reloaded = RecoveryManager::load(graph, temp.path()).await.unwrap().unwrap();
        assert!(reloaded.checkpoint().state.completed.contains("a"));
    }

    #[tokio::test]
    async fn test_mark_completed_is_idempotent() {
        let temp = tempdir().unwrap();
        let graph = graph();
        let mut manager = manager_with(graph.clone(), temp.path(), fresh_checkpoint(&graph)).await;

        manager.mark_completed(&["a".to_string()]).await.unwrap();
        let first = manager.checkpoint().state.clone();

        manager.mark_completed(&["a".to_string()]).await.unwrap();
        let second = &manager.checkpoint().state;

        assert_eq!(second.completed, first.completed);
        assert_eq!(second.ready, first.ready);
        assert_eq!(second.pending, first.pending);
    }

    #[tokio::test]
    async fn test_mark_completed_unknown_package() {
        let temp = tempdir().unwrap();
        let graph = graph();
        let mut manager = manager_with(graph.clone(), temp.path(), fresh_checkpoint(&graph)).await;

        let result = manager.mark_completed(&["ghost".to_string()]).await;
        assert!(matches!(result, Err(RecoveryError::PackageNotFound(name)) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_skip_packages_cascades_to_dependents() {
        let temp = tempdir().unwrap();
        let graph = graph();
        let mut manager = manager_with(graph.clone(), temp.path(), fresh_checkpoint(&graph)).await;

        let skipped = manager.skip_packages(&["a".to_string()]).await.unwrap();

        assert_eq!(skipped, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        let state = &manager.checkpoint().state;
        assert_eq!(state.skipped.len(), 3);
        assert!(state.pending.is_empty());

        // Idempotent
        let again = manager.skip_packages(&["a".to_string()]).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_reset_package_clears_history() {
        let temp = tempdir().unwrap();
        let graph = graph();
        let mut checkpoint = fresh_checkpoint(&graph);
        checkpoint.state.remove_pending("a");
        checkpoint.state.failed.push(failed_entry("a", false));
        checkpoint.retry_attempts.insert("a".to_string(), 3);
        checkpoint.timings.insert("a".to_string(), Default::default());

        let mut manager = manager_with(graph.clone(), temp.path(), checkpoint).await;
        manager.reset_package("a").await.unwrap();

        let state = &manager.checkpoint().state;
        assert!(state.failed.is_empty());
        assert_eq!(state.pending.first().map(String::as_str), Some("a"));
        assert!(!manager.checkpoint().retry_attempts.contains_key("a"));
        assert!(!manager.checkpoint().timings.contains_key("a"));

        // Resetting again is a no-op
        let before = manager.checkpoint().state.clone();
        manager.reset_package("a").await.unwrap();
        assert_eq!(manager.checkpoint().state.pending, before.pending);
    }

    #[tokio::test]
    async fn test_retry_failed_requeues_retriable_only() {
        let temp = tempdir().unwrap();
        let graph = graph();
        let mut checkpoint = fresh_checkpoint(&graph);
        checkpoint.state.remove_pending("a");
        checkpoint.state.remove_pending("b");
        checkpoint.state.failed.push(failed_entry("a", true));
        checkpoint.state.failed.push(failed_entry("b", false));
        checkpoint.retry_attempts.insert("a".to_string(), 3);

        let mut manager = manager_with(graph.clone(), temp.path(), checkpoint).await;
        let retried = manager.retry_failed(RetryOptions::default()).await.unwrap();

        assert_eq!(retried, vec!["a".to_string()]);
        let state = &manager.checkpoint().state;
        assert_eq!(state.failed.len(), 1);
        assert_eq!(state.failed[0].name, "b");
        // Retry counter reset so the bound starts over
        assert!(!manager.checkpoint().retry_attempts.contains_key("a"));
        // a went straight back to ready (no dependencies)
        assert!(state.ready.contains(&"a".to_string()));
    }

    #[tokio::test]
    async fn test_retry_failed_override_requeues_everything() {
        let temp = tempdir().unwrap();
        let graph = graph();
        let mut checkpoint = fresh_checkpoint(&graph);
        checkpoint.state.remove_pending("b");
        checkpoint.state.failed.push(failed_entry("b", false));

        let mut manager = manager_with(graph.clone(), temp.path(), checkpoint).await;
        let retried = manager
            .retry_failed(RetryOptions { max_retries: Some(5) })
            .await
            .unwrap();

        assert_eq!(retried, vec!["b".to_string()]);
        assert!(manager.checkpoint().state.failed.is_empty());
    }

    #[tokio::test]
    async fn test_skip_failed_cascades() {
        let temp = tempdir().unwrap();
        let graph = graph();
        let mut checkpoint = fresh_checkpoint(&graph);
        // a failed non-retriably, b pending depends on a
        checkpoint.state.remove_pending("a");
        checkpoint.state.failed.push(failed_entry("a", false));

        let mut manager = manager_with(graph.clone(), temp.path(), checkpoint).await;
        let skipped = manager.skip_failed().await.unwrap();

        let state = &manager.checkpoint().state;
        assert!(state.failed.is_empty());
        assert!(state.skipped.contains("a"));
        assert!(state.skipped.contains("b"));
        assert!(skipped.contains(&"a".to_string()));
        assert!(skipped.contains(&"b".to_string()));
    }

    #[tokio::test]
    async fn test_validate_state_reports_issues() {
        let temp = tempdir().unwrap();
        let graph = graph();
        let mut checkpoint = fresh_checkpoint(&graph);
        // a in two partitions, c missing, ghost unknown
        checkpoint.state.ready.push("a".to_string());
        checkpoint.state.remove_pending("c");
        checkpoint.state.completed.insert("ghost".to_string());

        let manager = manager_with(graph.clone(), temp.path(), checkpoint).await;
        let validation = manager.validate_state();

        assert!(!validation.valid);
        assert!(validation.issues.iter().any(|i| i.contains("Missing packages: c")));
        assert!(validation.issues.iter().any(|i| i.contains("multiple states")));
        assert!(validation.issues.iter().any(|i| i.contains("Unknown package 'ghost'")));
    }

    #[tokio::test]
    async fn test_validate_state_checks_failed_dependents() {
        let temp = tempdir().unwrap();
        let graph = graph();
        let mut checkpoint = fresh_checkpoint(&graph);
        checkpoint.state.remove_pending("b");
        let mut entry = failed_entry("b", false);
        entry.dependents = vec!["a".to_string()]; // a does not depend on b
        checkpoint.state.failed.push(entry);

        let manager = manager_with(graph.clone(), temp.path(), checkpoint).await;
        let validation = manager.validate_state();

        assert!(validation.issues.iter().any(|i| i.contains("lists 'a' as a dependent")));
    }

    #[tokio::test]
    async fn test_hints_cover_all_conditions() {
        let temp = tempdir().unwrap();
        let graph = graph();
        let mut checkpoint = fresh_checkpoint(&graph);
        checkpoint.state.remove_pending("a");
        checkpoint.state.remove_pending("b");
        checkpoint.state.failed.push(failed_entry("a", true));
        checkpoint.state.failed.push(failed_entry("b", false));
        let mut stuck = RunningPackage::start("c");
        stuck.started_at = Utc::now() - chrono::Duration::hours(2);
        checkpoint.state.remove_pending("c");
        checkpoint.state.running.push(stuck);

        let manager = manager_with(graph.clone(), temp.path(), checkpoint).await;
        let hints = manager.recovery_hints();

        assert!(hints.iter().any(|h| h.contains("--retry-failed")));
        assert!(hints.iter().any(|h| h.contains("--skip-failed")));
        assert!(hints.iter().any(|h| h.contains("may be stuck")));
    }

    #[tokio::test]
    async fn test_show_status_contents() {
        let temp = tempdir().unwrap();
        let graph = graph();
        let mut checkpoint = fresh_checkpoint(&graph);
        checkpoint.state.remove_pending("a");
        checkpoint.state.completed.insert("a".to_string());

        let manager = manager_with(graph.clone(), temp.path(), checkpoint).await;
        let status = manager.show_status();

        assert!(status.contains("Parallel Execution Status"));
        assert!(status.contains("Completed: 1/3"));
        assert!(status.contains("Pending:   2"));
        assert!(status.contains("Failed:    0"));
    }

    #[tokio::test]
    async fn test_apply_recovery_options_ordering() {
        let temp = tempdir().unwrap();
        let graph = graph();
        let mut checkpoint = fresh_checkpoint(&graph);
        checkpoint.state.remove_pending("a");
        checkpoint.state.failed.push(failed_entry("a", true));

        let mut manager = manager_with(graph.clone(), temp.path(), checkpoint).await;
        manager
            .apply_recovery_options(&RecoveryOptions {
                retry_failed: true,
                mark_completed: vec!["b".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();

        let state = &manager.checkpoint().state;
        // mark-completed ran before retry-failed: b is completed, a requeued
        assert!(state.completed.contains("b"));
        assert!(state.failed.is_empty());
        assert!(state.ready.contains(&"a".to_string()));
    }
}
