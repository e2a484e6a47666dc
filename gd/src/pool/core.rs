//! DynamicTaskPool - the dependency-aware parallel executor
//!
//! A single driver task owns the execution state and the resource
//! monitor; package operations run as spawned children. The driver
//! alternates between launching as many ready packages as slots allow and
//! awaiting the first in-flight completion, so no state mutation ever
//! happens concurrently and no lock is needed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cascade::skip_dependents;
use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointManager};
use crate::domain::{
    DependencyGraph, ExecutionMetrics, ExecutionResult, FailedPackage, Package, PackageResult, PublishedVersion,
    RunningPackage,
};
use crate::events::{EventBus, EventEmitter, PoolEvent};
use crate::recovery::generate_hints;
use crate::scheduler::Scheduler;

use super::config::PoolConfig;
use super::monitor::ResourceMonitor;
use super::retry::{RetryClassifier, retry_delay};

/// Fatal pool errors
///
/// Operation failures are handled inside the loop (retry or cascade);
/// everything here aborts the run after a best-effort checkpoint save.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Deadlock detected: {waiting} package(s) can never become ready")]
    Deadlock { waiting: usize },

    #[error("Execution cancelled")]
    Cancelled,

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// The per-package work the pool invokes
///
/// Implementations must honor the cancellation token promptly. Failures
/// are classified as transient or permanent by their message.
#[async_trait]
pub trait PackageOperation: Send + Sync {
    async fn run(&self, package: &Package, cancel: CancellationToken) -> eyre::Result<PackageResult>;
}

/// What a child task reports back to the driver
struct TaskCompletion {
    name: String,
    outcome: eyre::Result<PackageResult>,
    elapsed: Duration,
}

type InFlight = FuturesUnordered<BoxFuture<'static, TaskCompletion>>;

/// Dependency-aware parallel executor over a package graph
pub struct DynamicTaskPool {
    config: PoolConfig,
    graph: Arc<DependencyGraph>,
    scheduler: Scheduler,
    monitor: ResourceMonitor,
    checkpoints: CheckpointManager,
    events: EventBus,
    emitter: EventEmitter,
    operation: Arc<dyn PackageOperation>,
    cancel: CancellationToken,
    classifier: RetryClassifier,
    /// Live run record; `checkpoint.state` is THE execution state
    checkpoint: Checkpoint,
}

impl DynamicTaskPool {
    /// Create a pool for a graph, configuration, and injected operation
    pub fn new(graph: DependencyGraph, config: PoolConfig, operation: Arc<dyn PackageOperation>) -> Self {
        let graph = Arc::new(graph);
        let events = EventBus::with_default_capacity();
        let emitter = events.emitter();
        let checkpoint = Checkpoint::new(
            &graph,
            &config.command,
            config.config_snapshot.clone(),
            config.max_concurrency.max(1),
        );

        Self {
            scheduler: Scheduler::new(graph.clone()),
            monitor: ResourceMonitor::new(config.max_concurrency),
            checkpoints: CheckpointManager::new(&config.checkpoint_dir),
            events,
            emitter,
            operation,
            cancel: CancellationToken::new(),
            classifier: RetryClassifier::new(),
            checkpoint,
            graph,
            config,
        }
    }

    /// The event bus; subscribe before calling [`run`](Self::run)
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Token that cancels the whole run when triggered externally
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execution id of the current run (inherited on resume)
    pub fn execution_id(&self) -> &str {
        &self.checkpoint.execution_id
    }

    /// Drive the run to completion
    pub async fn run(&mut self) -> Result<ExecutionResult, PoolError> {
        self.initialize().await?;

        self.events.emit(PoolEvent::ExecutionStarted {
            execution_id: self.checkpoint.execution_id.clone(),
            command: self.checkpoint.command.clone(),
            total_packages: self.graph.len(),
            max_concurrency: self.monitor.metrics().max_concurrency,
        });
        info!(
            execution_id = %self.checkpoint.execution_id,
            packages = self.graph.len(),
            max_concurrency = self.monitor.metrics().max_concurrency,
            "Execution started"
        );

        let mut in_flight: InFlight = FuturesUnordered::new();

        self.refresh_ready();
        self.save_checkpoint().await?;

        loop {
            if self.cancel.is_cancelled() {
                return self.finish_cancelled(&mut in_flight).await;
            }

            self.launch_ready(&mut in_flight);

            if in_flight.is_empty() {
                let waiting = self.checkpoint.state.ready.len() + self.checkpoint.state.pending.len();
                if waiting > 0 {
                    error!(waiting, "Deadlock: nothing running and waiting packages can never start");
                    self.checkpoint.can_recover = true;
                    let _ = self.save_checkpoint().await;
                    return Err(PoolError::Deadlock { waiting });
                }
                break;
            }

            let completion = tokio::select! {
                // Cancellation wins over a simultaneous completion so the
                // cancel never marks anything failed
                biased;
                _ = self.cancel.cancelled() => {
                    return self.finish_cancelled(&mut in_flight).await;
                }
                next = in_flight.next() => next,
            };

            if let Some(completion) = completion {
                self.handle_completion(completion).await;
                self.refresh_ready();
                self.save_checkpoint().await?;
            }
        }

        self.finalize().await
    }

    /// Build or restore the starting state
    async fn initialize(&mut self) -> Result<(), CheckpointError> {
        if !self.config.continue_run {
            return Ok(());
        }

        let Some(mut saved) = self.checkpoints.load().await? else {
            debug!("No checkpoint to resume from, starting fresh");
            return Ok(());
        };

        // Mid-flight work cannot be resumed; requeue it
        let interrupted: Vec<String> = saved.state.running.drain(..).map(|r| r.name).collect();
        for name in interrupted {
            if !saved.state.pending.iter().any(|n| n == &name) {
                warn!(package = %name, "Interrupted mid-run, requeued");
                saved.state.pending.push(name);
            }
        }

        info!(
            execution_id = %saved.execution_id,
            completed = saved.state.completed.len(),
            "Resuming from checkpoint"
        );

        saved.max_concurrency = self.config.max_concurrency.max(1);
        self.checkpoint = saved;
        self.sort_pending();
        Ok(())
    }

    /// Move pending packages whose dependencies completed into ready
    fn refresh_ready(&mut self) {
        let newly = self.scheduler.checker().newly_ready(&self.checkpoint.state);
        for name in newly {
            debug!(package = %name, "Package is ready");
            self.checkpoint.state.remove_pending(&name);
            self.checkpoint.state.ready.push(name);
        }
    }

    /// Launch scheduler picks until slots or ready packages run out
    fn launch_ready(&mut self, in_flight: &mut InFlight) {
        loop {
            let free = self.monitor.available_slots();
            if free == 0 || self.checkpoint.state.ready.is_empty() {
                return;
            }

            let picks = self
                .scheduler
                .select_next(free, &self.checkpoint.state, &self.checkpoint.retry_attempts);
            if picks.is_empty() {
                return;
            }

            for name in picks {
                if !self.monitor.allocate(1) {
                    return;
                }
                self.launch_one(name, in_flight);
            }
        }
    }

    fn launch_one(&mut self, name: String, in_flight: &mut InFlight) {
        self.checkpoint.state.remove_ready(&name);
        self.checkpoint.state.running.push(RunningPackage::start(&name));

        let attempt = {
            let count = self.checkpoint.retry_attempts.entry(name.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let timing = self.checkpoint.timings.entry(name.clone()).or_default();
        timing.started_at = Some(Utc::now());
        timing.ended_at = None;
        timing.duration_ms = None;

        self.emitter.package_started(&name, attempt);
        info!(package = %name, attempt, "Launching operation");

        let operation = self.operation.clone();
        // Name is validated at graph construction; a miss here cannot happen
        let package = self.graph.get(&name).cloned().unwrap_or_else(|| Package::new(&name));
        let token = self.cancel.child_token();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = operation.run(&package, token).await;
            TaskCompletion {
                name: task_name,
                outcome,
                elapsed: started.elapsed(),
            }
        });

        in_flight.push(Box::pin(async move {
            match handle.await {
                Ok(completion) => completion,
                Err(join_error) => TaskCompletion {
                    name,
                    outcome: Err(eyre::eyre!("operation panicked: {join_error}")),
                    elapsed: Duration::ZERO,
                },
            }
        }));
    }

    /// Apply one child's result to the state
    async fn handle_completion(&mut self, completion: TaskCompletion) {
        self.monitor.release(1);
        let TaskCompletion { name, outcome, elapsed } = completion;

        match outcome {
            Ok(result) if result.success => self.handle_success(name, result, elapsed),
            Ok(_) => {
                let error = eyre::eyre!("operation reported failure without an error");
                self.handle_failure(name, error, elapsed).await;
            }
            Err(error) => self.handle_failure(name, error, elapsed).await,
        }
    }

    fn handle_success(&mut self, name: String, result: PackageResult, elapsed: Duration) {
        let ended = Utc::now();
        self.checkpoint.state.remove_running(&name);
        self.checkpoint.state.completed.insert(name.clone());

        let duration_ms = result.duration_ms.unwrap_or(elapsed.as_millis() as u64);
        let timing = self.checkpoint.timings.entry(name.clone()).or_default();
        timing.ended_at = Some(ended);
        timing.duration_ms = Some(duration_ms);

        if let Some(version) = result.published_version {
            info!(package = %name, %version, "Published version recorded");
            self.checkpoint.published_versions.push(PublishedVersion {
                package: name.clone(),
                version,
                published_at: ended,
            });
        }

        self.emitter.package_completed(&name, duration_ms);
        info!(package = %name, duration_ms, "Package completed");
    }

    async fn handle_failure(&mut self, name: String, error: eyre::Report, elapsed: Duration) {
        let message = error.to_string();
        let attempts = self.checkpoint.retry_attempts.get(&name).copied().unwrap_or(0);
        let retriable = self.classifier.is_retriable(&message);

        if retriable && attempts < self.config.max_retries {
            // Back to pending; it re-enters ready on the next readiness pass
            self.checkpoint.state.remove_running(&name);
            self.checkpoint.state.pending.push(name.clone());
            self.sort_pending();

            let delay = retry_delay(&self.config, attempts);
            self.emitter
                .package_retrying(&name, attempts, delay.as_millis() as u64, &message);
            warn!(package = %name, attempt = attempts, ?delay, error = %message, "Transient failure, retrying");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {}
            }
            return;
        }

        self.checkpoint.state.remove_running(&name);
        let timing = self.checkpoint.timings.entry(name.clone()).or_default();
        timing.ended_at = Some(Utc::now());
        timing.duration_ms = Some(elapsed.as_millis() as u64);

        self.checkpoint.state.failed.push(FailedPackage {
            name: name.clone(),
            error: message.clone(),
            stack: Some(format!("{error:?}")),
            retriable,
            attempts,
            failed_at: Utc::now(),
            dependencies: self.graph.dependencies_of(&name).to_vec(),
            dependents: self.graph.dependents_of(&name).to_vec(),
        });

        self.emitter.package_failed(&name, &message, attempts, retriable);
        error!(package = %name, attempts, error = %message, "Package failed permanently");

        let reason = format!("dependency {name} failed: {message}");
        let skipped = skip_dependents(self.scheduler.checker(), &mut self.checkpoint.state, &name);
        for skipped_name in &skipped {
            self.emitter.package_skipped(skipped_name, &reason);
        }
        if !skipped.is_empty() {
            warn!(package = %name, count = skipped.len(), "Cascaded skip to dependents");
        }
    }

    /// Keep `pending` in build order after requeues
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

    /// Stamp running elapsed times and persist the checkpoint
    async fn save_checkpoint(&mut self) -> Result<(), CheckpointError> {
        let now = Utc::now();
        for running in &mut self.checkpoint.state.running {
            running.elapsed_ms = (now - running.started_at).num_milliseconds().max(0) as u64;
        }

        self.checkpoints.save(&mut self.checkpoint).await?;
        self.emitter
            .checkpoint_saved(&self.checkpoints.path().display().to_string());
        Ok(())
    }

    /// Drain children after a cancellation, then save and bail
    ///
    /// The cancel itself marks nothing failed: whatever was in flight
    /// stays recorded as running in the final checkpoint.
    async fn finish_cancelled(&mut self, in_flight: &mut InFlight) -> Result<ExecutionResult, PoolError> {
        warn!("Cancellation requested, draining in-flight operations");

        while let Some(_completion) = in_flight.next().await {
            self.monitor.release(1);
        }

        self.checkpoint.can_recover = true;
        self.checkpoint.recovery_hints = generate_hints(&self.graph, &self.checkpoint);
        let _ = self.save_checkpoint().await;

        Err(PoolError::Cancelled)
    }

    /// Clean up or retain the checkpoint and assemble the result
    async fn finalize(&mut self) -> Result<ExecutionResult, PoolError> {
        let clean = self.checkpoint.state.failed.is_empty() && self.checkpoint.state.skipped.is_empty();

        if clean {
            self.checkpoints.cleanup().await?;
            debug!("Clean run, checkpoint deleted");
        } else {
            self.checkpoint.can_recover = true;
            self.checkpoint.recovery_hints = generate_hints(&self.graph, &self.checkpoint);
            self.save_checkpoint().await?;
        }

        let result = self.build_result();
        self.events.emit(PoolEvent::ExecutionCompleted {
            execution_id: self.checkpoint.execution_id.clone(),
            success: result.success,
            completed: result.completed.len(),
            failed: result.failed.len(),
            skipped: result.skipped.len(),
            duration_ms: result.metrics.total_duration_ms,
        });
        info!(
            success = result.success,
            completed = result.completed.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            "Execution completed"
        );

        Ok(result)
    }

    fn build_result(&self) -> ExecutionResult {
        let state = &self.checkpoint.state;
        let monitor = self.monitor.metrics();

        let total_duration_ms = (Utc::now() - self.checkpoint.started_at).num_milliseconds().max(0) as u64;

        let durations: Vec<u64> = state
            .completed
            .iter()
            .filter_map(|name| self.checkpoint.timings.get(name).and_then(|t| t.duration_ms))
            .collect();
        let average_package_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<u64>() as f64 / durations.len() as f64
        };

        // Report membership in build order for stable output
        let completed = self
            .checkpoint
            .build_order
            .iter()
            .filter(|n| state.completed.contains(*n))
            .cloned()
            .collect();
        let skipped = self
            .checkpoint
            .build_order
            .iter()
            .filter(|n| state.skipped.contains(*n))
            .cloned()
            .collect();

        ExecutionResult {
            success: state.failed.is_empty(),
            total_packages: self.graph.len(),
            completed,
            failed: state.failed.clone(),
            skipped,
            metrics: ExecutionMetrics {
                total_duration_ms,
                average_package_duration_ms,
                peak_concurrency: monitor.peak_concurrency,
                average_concurrency: monitor.average_concurrency,
            },
        }
    }
}
