//! Storage module for persisting harvest progress
//!
//! This module handles everything written to disk, including:
//! - The JSON checkpoint (accepted hashes and resume index)
//! - The image directory, one file per accepted image
//! - Crash-safe whole-file replacement used by both

mod files;
mod json;
mod traits;

pub use files::{atomic_write, ImageStore, PersistOutcome};
pub use json::JsonCheckpointStore;
pub use traits::{CheckpointStore, StorageError, StorageResult};
