//! JSON checkpoint file implementation
//!
//! This module provides a file-backed implementation of the CheckpointStore trait.

use crate::state::CheckpointState;
use crate::storage::files::atomic_write;
use crate::storage::traits::{CheckpointStore, StorageError, StorageResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Checkpoint stored as a single JSON document
///
/// Every save rewrites the whole file through a temporary sibling and an
/// atomic rename, so a crash leaves either the old or the new document.
#[derive(Debug)]
pub struct JsonCheckpointStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonCheckpointStore {
    /// Creates a store for the checkpoint at `path`
    ///
    /// Nothing is read or written until `load` or `save` is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn load(&self) -> StorageResult<CheckpointState> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No checkpoint at {}, starting empty", self.path.display());
                return Ok(CheckpointState::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map_err(|source| StorageError::CorruptCheckpoint {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn save(&self, state: &CheckpointState) -> StorageResult<()> {
        let encoded = serde_json::to_vec(state)?;

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        atomic_write(&self.path, &encoded)?;

        tracing::trace!(
            "Saved checkpoint: {} hashes, resume index {}",
            state.accepted_count(),
            state.resume_index()
        );
        Ok(())
    }
}
