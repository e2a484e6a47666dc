//! CheckStore - atomic single-document persistence
//!
//! Stores one serializable document at a fixed path. Writes go through a
//! temp file + fsync + rename so a crashed writer can never leave a torn
//! artifact, and an advisory lock file rejects a second concurrent writer.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Errors from document store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Corrupt document at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Document is locked by another process: {path}")]
    Locked { path: PathBuf },
}

/// Atomic store for a single JSON document
///
/// The document lives at exactly one path. `save` replaces it atomically;
/// `load` distinguishes a missing document (`Ok(None)`) from a corrupt one
/// (`Err(StoreError::Corrupt)`).
pub struct DocStore {
    path: PathBuf,
}

impl DocStore {
    /// Create a store for the document at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(?path, "DocStore::new: called");
        Self { path }
    }

    /// Path of the stored document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Quick presence check
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Take the advisory writer lock, failing fast if another process holds it
    fn acquire_lock(&self) -> Result<std::fs::File, StoreError> {
        let lock_path = self.lock_path();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        file.try_lock_exclusive().map_err(|e| {
            if e.kind() == fs2::lock_contended_error().kind() {
                StoreError::Locked { path: lock_path }
            } else {
                StoreError::Io(e)
            }
        })?;

        Ok(file)
    }

    /// Persist the document atomically
    ///
    /// Serializes to pretty JSON, writes a sibling temp file, fsyncs it,
    /// then renames over the target. The lock is held across the whole
    /// write so two writers cannot interleave.
    pub async fn save<T: Serialize>(&self, doc: &T) -> Result<(), StoreError> {
        debug!(path = ?self.path, "DocStore::save: called");

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let lock = self.acquire_lock()?;

        let bytes = serde_json::to_vec_pretty(doc)?;
        let temp_path = self.temp_path();

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;

        drop(lock);
        debug!(path = ?self.path, bytes = bytes.len(), "DocStore::save: document written");
        Ok(())
    }

    /// Load the document, or `None` if it has never been saved
    pub async fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        debug!(path = ?self.path, "DocStore::load: called");

        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("DocStore::load: document does not exist");
                return Ok(None);
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        let doc = serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        Ok(Some(doc))
    }

    /// Remove the document and its sidecar files (no-op if absent)
    pub async fn remove(&self) -> Result<(), StoreError> {
        debug!(path = ?self.path, "DocStore::remove: called");

        for path in [self.path.clone(), self.temp_path(), self.lock_path()] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
        }

        Ok(())
    }
}
