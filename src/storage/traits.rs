//! Storage traits and error types
//!
//! This module defines the trait interface for checkpoint backends and
//! associated error types.

use crate::state::CheckpointState;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// The checkpoint exists but cannot be parsed; progress must not be discarded
    #[error("Checkpoint at {path} is corrupt: {source}")]
    CorruptCheckpoint {
        path: String,
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for checkpoint persistence backends
///
/// Implementations must serialize concurrent `save` calls so that the
/// durable copy always equals one complete state that was passed to `save`.
pub trait CheckpointStore: Send + Sync {
    /// Loads the persisted state
    ///
    /// Returns an empty state if nothing has been persisted yet, and
    /// [`StorageError::CorruptCheckpoint`] if the persisted form is unreadable.
    fn load(&self) -> StorageResult<CheckpointState>;

    /// Replaces the persisted state with `state`
    ///
    /// If the write does not complete, the previously persisted state remains.
    fn save(&self, state: &CheckpointState) -> StorageResult<()>;
}
