//! Crawler module for image harvesting
//!
//! This module contains the core harvesting logic, including:
//! - Fetching candidate payloads (remote or inline)
//! - Structural verification and perceptual signing
//! - The bounded ingestion pipeline and its commit section
//! - Enumeration sources and overall harvest coordination

mod coordinator;
mod fetcher;
mod ledger;
mod pipeline;
mod source;
mod stop;
pub mod verify;

pub use coordinator::{Coordinator, RunReport};
pub use fetcher::{
    abbreviate, build_http_client, classify_source, decode_inline, fetch_source, FetchError,
    RawImage, SizeLimits, SourceKind,
};
pub use ledger::Ledger;
pub use pipeline::{CandidateOutcome, IngestionPipeline, PipelineContext, WorkerSlot};
pub use source::{CandidateSource, SourceError, StaticSource};
pub use stop::{stop_channel, StopHandle, StopSignal};
pub use verify::{decode_image, verify_and_sign};

use crate::config::Config;
use crate::HarvestResult;
use std::path::Path;

/// Runs a complete harvest over a JSON-lines candidate file
///
/// This is the main entry point for a one-shot harvest. It will:
/// 1. Load the candidate list
/// 2. Load the checkpoint and rebuild the duplicate index
/// 3. Resume enumeration and process candidates until exhausted
/// 4. Flush the final checkpoint
pub async fn harvest(config: Config, candidates: &Path) -> HarvestResult<RunReport> {
    let source = StaticSource::from_json_lines(candidates)?;
    tracing::info!(
        "Loaded {} candidates from {}",
        source.len(),
        candidates.display()
    );
    Coordinator::new(config, source, false)?.run().await
}
