//! Crawl coordinator - main harvest orchestration logic
//!
//! This module contains the enumeration loop that coordinates a harvest:
//! - Loading the checkpoint and rebuilding the duplicate index
//! - Positioning the source at the resume index
//! - Retrying transient enumeration failures
//! - Filtering candidates on declared dimensions
//! - Dispatching survivors to the ingestion pipeline
//! - Stopping gracefully and flushing the final checkpoint

use crate::config::Config;
use crate::crawler::pipeline::{IngestionPipeline, PipelineContext};
use crate::crawler::source::{CandidateSource, SourceError};
use crate::crawler::stop::{stop_channel, StopHandle, StopSignal};
use crate::crawler::{abbreviate, build_http_client, SizeLimits};
use crate::dedup::{rebuild_index, DuplicateIndex, RebuildReport};
use crate::output::{HarvestStats, StatsSnapshot};
use crate::state::{Candidate, CheckpointState};
use crate::storage::{CheckpointStore, ImageStore, JsonCheckpointStore};
use crate::{HarvestError, HarvestResult};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress is logged every this many consumed candidates
const PROGRESS_INTERVAL: u64 = 25;

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Counters at the end of the run
    pub stats: StatsSnapshot,

    /// Resume index written by the final checkpoint flush
    pub resume_index: u64,

    /// True if the run ended because a stop was requested
    pub stopped: bool,

    /// What the startup index rebuild found
    pub rebuild: RebuildReport,
}

/// Main harvest coordinator structure
pub struct Coordinator<S> {
    config: Arc<Config>,
    source: S,
    store: Arc<dyn CheckpointStore>,
    index: Arc<DuplicateIndex>,
    images: ImageStore,
    client: Client,
    checkpoint: CheckpointState,
    stats: Arc<HarvestStats>,
    stop_handle: StopHandle,
    stop: StopSignal,
    rebuild: RebuildReport,
    start_index: u64,
}

impl<S: CandidateSource> Coordinator<S> {
    /// Creates a new coordinator using the JSON checkpoint named in `config`
    ///
    /// # Arguments
    ///
    /// * `config` - The harvester configuration
    /// * `source` - Where candidates come from
    /// * `fresh` - Whether to restart enumeration at index 0 (saved images
    ///   and accepted hashes are kept)
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(HarvestError)` - Failed to initialize
    pub fn new(config: Config, source: S, fresh: bool) -> HarvestResult<Self> {
        let store = Arc::new(JsonCheckpointStore::new(&config.output.checkpoint_path));
        Self::with_store(config, source, store, fresh)
    }

    /// Creates a new coordinator backed by an arbitrary checkpoint store
    ///
    /// A checkpoint that exists but cannot be parsed is a fatal error; the
    /// harvest does not start over silently.
    pub fn with_store(
        config: Config,
        source: S,
        store: Arc<dyn CheckpointStore>,
        fresh: bool,
    ) -> HarvestResult<Self> {
        let mut checkpoint = store.load()?;
        tracing::info!(
            "Loaded checkpoint: {} accepted images, resume index {}",
            checkpoint.accepted_count(),
            checkpoint.resume_index()
        );

        // A fresh run only changes where enumeration starts; the saved
        // resume index is never lowered
        let start_index = if fresh { 0 } else { checkpoint.resume_index() };
        if fresh && checkpoint.resume_index() > 0 {
            tracing::info!(
                "Fresh run requested; enumeration restarts at 0 instead of {}",
                checkpoint.resume_index()
            );
        }

        // Prepare the image directory
        let images = ImageStore::new(&config.output.image_dir);
        let output_dir_error = |source: std::io::Error| HarvestError::OutputDir {
            path: images.dir().display().to_string(),
            source,
        };
        images.prepare().map_err(output_dir_error)?;

        // Rebuild the duplicate index from what is already on disk
        let index = Arc::new(DuplicateIndex::new(config.dedup.near_duplicate_threshold));
        let started = Instant::now();
        let rebuild =
            rebuild_index(&index, images.dir(), &mut checkpoint).map_err(output_dir_error)?;
        tracing::info!(
            "Duplicate index rebuilt in {:?}: {} signed, {} exact-only",
            started.elapsed(),
            rebuild.signed,
            rebuild.hash_only
        );

        if !rebuild.reconciled.is_empty() {
            tracing::warn!(
                "Recovered {} saved images missing from the checkpoint",
                rebuild.reconciled.len()
            );
            checkpoint.touch();
            store.save(&checkpoint)?;
        }

        // Build HTTP client
        let client = build_http_client(&config.fetch)?;

        let (stop_handle, stop) = stop_channel();

        Ok(Self {
            config: Arc::new(config),
            source,
            store,
            index,
            images,
            client,
            checkpoint,
            stats: Arc::new(HarvestStats::new()),
            stop_handle,
            stop,
            rebuild,
            start_index,
        })
    }

    /// Replaces the coordinator's stop channel
    ///
    /// Lets a caller hand out the stop handle before the coordinator exists.
    pub fn with_stop_channel(mut self, (stop_handle, stop): (StopHandle, StopSignal)) -> Self {
        self.stop_handle = stop_handle;
        self.stop = stop;
        self
    }

    /// Handle that asks a running harvest to stop gracefully
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    /// Counters updated while the harvest runs
    pub fn stats(&self) -> Arc<HarvestStats> {
        Arc::clone(&self.stats)
    }

    /// Checkpoint state the run will start from
    pub fn checkpoint(&self) -> &CheckpointState {
        &self.checkpoint
    }

    /// Runs the main harvest loop
    ///
    /// This is the core orchestration logic that:
    /// 1. Seeks the source to the resume index
    /// 2. Pulls candidates, retrying transient failures
    /// 3. Drops candidates that fail the declared-dimension floor
    /// 4. Dispatches the rest, waiting for a free worker
    /// 5. Drains in-flight work and flushes the checkpoint
    ///
    /// A stop request ends steps 2-4 promptly; step 5 always runs.
    pub async fn run(self) -> HarvestResult<RunReport> {
        let Self {
            config,
            mut source,
            store,
            index,
            images,
            client,
            checkpoint,
            stats,
            stop_handle: _stop_handle,
            mut stop,
            rebuild,
            start_index,
        } = self;

        let harvester = &config.harvester;
        let backoff = harvester.enumeration_backoff();
        let start_time = Instant::now();

        tracing::info!(
            "Starting harvest at index {} with {} workers",
            start_index,
            harvester.max_concurrent_downloads
        );
        let positioned = seek_with_retry(
            &mut source,
            start_index,
            harvester.enumeration_retries,
            backoff,
        )
        .await;
        if !positioned {
            tracing::error!(
                "Could not position the source at index {}; finishing without enumerating",
                start_index
            );
        }

        let ctx = PipelineContext::new(
            client,
            index,
            images,
            store,
            checkpoint,
            Arc::clone(&stats),
            SizeLimits::from(&config.fetch),
        );
        let mut pipeline = IngestionPipeline::new(ctx, harvester.max_concurrent_downloads as usize);

        let mut last_index: Option<u64> = None;
        let mut stopped = false;
        let mut next_progress = PROGRESS_INTERVAL;

        if positioned {
            loop {
                if stop.is_stopped() {
                    stopped = true;
                    break;
                }

                let step = tokio::select! {
                    biased;
                    _ = stop.stopped() => {
                        stopped = true;
                        break;
                    }
                    step = next_step(&mut source, harvester.enumeration_retries, backoff, &stats) => step,
                };

                let candidate = match step {
                    Step::Candidate(candidate) => candidate,
                    Step::Skipped => continue,
                    Step::Exhausted => {
                        tracing::info!("Enumeration exhausted");
                        break;
                    }
                };
                stats.record_enumerated();

                let sequence_index = candidate.sequence_index;
                if let Some(previous) = last_index {
                    if sequence_index <= previous {
                        tracing::warn!(
                            "Dropping candidate {} that does not follow {} in sequence",
                            sequence_index,
                            previous
                        );
                        stats.record_out_of_order();
                        continue;
                    }
                }
                last_index = Some(sequence_index);

                if !candidate.meets_dimension_floor(harvester.min_declared_dimension) {
                    tracing::debug!(
                        "Skipping candidate {} ({}): declared {:?}x{:?} below {}",
                        sequence_index,
                        abbreviate(&candidate.source_url),
                        candidate.declared_width,
                        candidate.declared_height,
                        harvester.min_declared_dimension
                    );
                    pipeline.mark_filtered(sequence_index).await;
                } else {
                    let slot = tokio::select! {
                        biased;
                        _ = stop.stopped() => {
                            stopped = true;
                            break;
                        }
                        slot = pipeline.acquire_slot() => slot?,
                    };
                    tracing::debug!(
                        "Dispatching candidate {} ({})",
                        sequence_index,
                        abbreviate(&candidate.source_url)
                    );
                    pipeline.dispatch(slot, candidate).await;
                }

                let consumed = stats.snapshot().consumed();
                if consumed >= next_progress {
                    next_progress = consumed - consumed % PROGRESS_INTERVAL + PROGRESS_INTERVAL;
                    let elapsed = start_time.elapsed();
                    let rate = consumed as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
                    tracing::info!(
                        "Progress: {} candidates consumed, {} kept, {} in flight, {:.2} candidates/sec",
                        consumed,
                        stats.snapshot().committed,
                        pipeline.in_flight(),
                        rate
                    );
                }
            }
        }

        if stopped {
            tracing::info!("Stop requested; no further candidates will be dispatched");
        }

        let resume_index = pipeline.drain().await?;
        let snapshot = stats.snapshot();

        tracing::info!(
            "Harvest finished in {:?}: {} kept, {} rejected, {} filtered; resume index {}",
            start_time.elapsed(),
            snapshot.committed,
            snapshot.rejected(),
            snapshot.filtered,
            resume_index
        );

        Ok(RunReport {
            stats: snapshot,
            resume_index,
            stopped,
            rebuild,
        })
    }
}

/// Positions the source at `start_index`, retrying transient failures
///
/// Returns false if the source stays unpositioned after `attempts` tries or
/// reports itself closed. The run then enumerates nothing but still drains
/// and flushes its checkpoint.
async fn seek_with_retry<S: CandidateSource>(
    source: &mut S,
    start_index: u64,
    attempts: u32,
    backoff: Duration,
) -> bool {
    let mut attempt = 1;
    loop {
        match source.seek(start_index).await {
            Ok(()) => return true,
            Err(SourceError::Transient(reason)) if attempt < attempts => {
                tracing::warn!(
                    "Seek attempt {}/{} failed: {}; retrying in {:?}",
                    attempt,
                    attempts,
                    reason,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(SourceError::Transient(reason)) => {
                tracing::error!("Seek failed after {} attempts: {}", attempts, reason);
                return false;
            }
            Err(SourceError::Closed(reason)) => {
                tracing::error!("Enumeration source closed while seeking: {}", reason);
                return false;
            }
        }
    }
}

/// What one enumeration attempt produced
enum Step {
    Candidate(Candidate),
    Skipped,
    Exhausted,
}

/// Pulls the next candidate, retrying transient failures with a fixed backoff
///
/// After `attempts` failures the current candidate is skipped and
/// enumeration moves on. A closed source ends enumeration.
async fn next_step<S: CandidateSource>(
    source: &mut S,
    attempts: u32,
    backoff: Duration,
    stats: &HarvestStats,
) -> Step {
    let mut attempt = 1;
    loop {
        match source.next_candidate().await {
            Ok(Some(candidate)) => return Step::Candidate(candidate),
            Ok(None) => return Step::Exhausted,
            Err(SourceError::Transient(reason)) if attempt < attempts => {
                tracing::warn!(
                    "Enumeration attempt {}/{} failed: {}; retrying in {:?}",
                    attempt,
                    attempts,
                    reason,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(SourceError::Transient(reason)) => {
                tracing::warn!(
                    "Skipping candidate after {} failed attempts: {}",
                    attempts,
                    reason
                );
                source.skip_current();
                stats.record_enumeration_skip();
                return Step::Skipped;
            }
            Err(SourceError::Closed(reason)) => {
                tracing::error!("Enumeration source closed: {}", reason);
                return Step::Exhausted;
            }
        }
    }
}
