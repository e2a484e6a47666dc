//! Checkpoint record and its manager
//!
//! The checkpoint is the single durable artifact of a run: enough state
//! and metadata to resume after a crash or to operate on offline with the
//! recovery manager. It lives at `<dir>/.graphdrive/checkpoint.json` and
//! is written atomically through [`checkstore`].

use std::collections::BTreeMap;
use std::path::Path;

use checkstore::{DocStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{DependencyGraph, ExecutionState, GraphSnapshot, PackageTiming, PublishedVersion};

/// Schema version written by and accepted by this build
pub const SCHEMA_VERSION: u32 = 1;

/// Directory under the working dir that holds the artifact
pub const CHECKPOINT_DIR: &str = ".graphdrive";

/// Artifact file name
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Errors from checkpoint persistence
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Checkpoint schema version {found} is not supported (expected {expected})")]
    SchemaMismatch { found: u32, expected: u32 },
}

/// Durable snapshot of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub schema_version: u32,
    pub execution_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Label of the command being run
    pub command: String,
    /// Opaque caller config, snapshotted verbatim
    pub config: Value,
    pub graph: GraphSnapshot,
    pub build_order: Vec<String>,
    pub execution_mode: String,
    pub max_concurrency: usize,
    pub state: ExecutionState,
    #[serde(default)]
    pub published_versions: Vec<PublishedVersion>,
    #[serde(default)]
    pub retry_attempts: BTreeMap<String, u32>,
    #[serde(default)]
    pub timings: BTreeMap<String, PackageTiming>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub recovery_hints: Vec<String>,
    pub can_recover: bool,
}

impl Checkpoint {
    /// Fresh checkpoint for a run that is just starting
    pub fn new(graph: &DependencyGraph, command: &str, config: Value, max_concurrency: usize) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            execution_id: Uuid::now_v7().to_string(),
            created_at: now,
            updated_at: now,
            command: command.to_string(),
            config,
            graph: graph.snapshot(),
            build_order: graph.build_order(),
            execution_mode: "parallel".to_string(),
            max_concurrency,
            state: ExecutionState::for_graph(graph),
            published_versions: Vec::new(),
            retry_attempts: BTreeMap::new(),
            timings: BTreeMap::new(),
            started_at: now,
            recovery_hints: Vec::new(),
            can_recover: false,
        }
    }

    /// Packages completed out of the total, for status displays
    pub fn progress(&self) -> (usize, usize) {
        (self.state.completed.len(), self.build_order.len())
    }
}

/// Atomic reader/writer for the checkpoint artifact
pub struct CheckpointManager {
    store: DocStore,
}

impl CheckpointManager {
    /// Manager for the artifact under `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join(CHECKPOINT_DIR).join(CHECKPOINT_FILE);
        Self {
            store: DocStore::new(path),
        }
    }

    /// Path of the artifact
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Quick presence check
    pub fn exists(&self) -> bool {
        self.store.exists()
    }

    /// Persist the checkpoint, stamping `updated_at`
    pub async fn save(&self, checkpoint: &mut Checkpoint) -> Result<(), CheckpointError> {
        checkpoint.updated_at = Utc::now();
        self.store.save(checkpoint).await?;
        debug!(path = ?self.store.path(), "CheckpointManager::save: checkpoint written");
        Ok(())
    }

    /// Load the last saved checkpoint, or `None` if there is none
    ///
    /// A present-but-unparsable artifact surfaces as a distinct corrupt
    /// error; a foreign schema version is rejected outright.
    pub async fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let Some(checkpoint) = self.store.load::<Checkpoint>().await? else {
            return Ok(None);
        };

        if checkpoint.schema_version != SCHEMA_VERSION {
            return Err(CheckpointError::SchemaMismatch {
                found: checkpoint.schema_version,
                expected: SCHEMA_VERSION,
            });
        }

        Ok(Some(checkpoint))
    }

    /// Remove the artifact
    pub async fn cleanup(&self) -> Result<(), CheckpointError> {
        self.store.remove().await?;
        debug!(path = ?self.store.path(), "CheckpointManager::cleanup: checkpoint removed");
        Ok(())
    }
}
