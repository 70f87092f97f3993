//! Sumi-Harvest: a resumable, deduplicating image harvester
//!
//! This crate ingests image candidates yielded by an external enumeration
//! source, downloads and verifies them, and keeps only images that are neither
//! byte-identical nor visually near-identical to ones already kept. Progress
//! is checkpointed so an interrupted harvest resumes without redoing work.

pub mod config;
pub mod crawler;
pub mod dedup;
pub mod output;
pub mod service;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Sumi-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Cannot open output directory {path}: {source}")]
    OutputDir {
        path: String,
        source: std::io::Error,
    },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Worker pool error: {0}")]
    Pool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for Sumi-Harvest operations
pub type HarvestResult<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, RunReport, StopHandle};
pub use dedup::{ContentHash, DuplicateIndex, PerceptualSignature};
pub use state::{Candidate, CandidateState, CheckpointState, RejectReason};
