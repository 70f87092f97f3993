//! Output module for reporting harvest progress and results
//!
//! This module handles:
//! - Live counters shared by the orchestrator and workers
//! - Printing run statistics at the end of a harvest
//! - Summarizing a harvest at rest from its checkpoint and image directory

pub mod stats;

pub use stats::{
    load_checkpoint_summary, print_checkpoint_summary, print_statistics, CheckpointSummary,
    HarvestStats, StatsSnapshot,
};
