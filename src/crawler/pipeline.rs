//! Ingestion pipeline
//!
//! Runs fetch & verify for dispatched candidates on a bounded pool of tokio
//! tasks and commits accepted images. Commit is a single critical section:
//! the authoritative duplicate check, the image write, index registration
//! and the checkpoint save all happen under the ledger lock, so two workers
//! holding identical bytes can never both be accepted.

use crate::crawler::fetcher::{abbreviate, fetch_source, FetchError, RawImage, SizeLimits};
use crate::crawler::ledger::Ledger;
use crate::crawler::verify::verify_and_sign;
use crate::dedup::{ContentHash, DuplicateIndex, PerceptualSignature};
use crate::output::HarvestStats;
use crate::state::{Candidate, CandidateState, CheckpointState, RejectReason};
use crate::storage::{CheckpointStore, ImageStore, PersistOutcome};
use crate::{HarvestError, HarvestResult};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};

/// Final result of one dispatched candidate
#[derive(Debug)]
pub enum CandidateOutcome {
    Committed {
        index: u64,
        hash: ContentHash,
        already_present: bool,
    },
    Rejected {
        index: u64,
        reason: RejectReason,
    },
}

impl CandidateOutcome {
    pub fn index(&self) -> u64 {
        match self {
            Self::Committed { index, .. } | Self::Rejected { index, .. } => *index,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Shared resources every worker needs
pub struct PipelineContext {
    client: Client,
    index: Arc<DuplicateIndex>,
    images: ImageStore,
    store: Arc<dyn CheckpointStore>,
    ledger: Mutex<Ledger>,
    stats: Arc<HarvestStats>,
    limits: SizeLimits,
}

impl PipelineContext {
    pub fn new(
        client: Client,
        index: Arc<DuplicateIndex>,
        images: ImageStore,
        store: Arc<dyn CheckpointStore>,
        checkpoint: CheckpointState,
        stats: Arc<HarvestStats>,
        limits: SizeLimits,
    ) -> Self {
        Self {
            client,
            index,
            images,
            store,
            ledger: Mutex::new(Ledger::new(checkpoint)),
            stats,
            limits,
        }
    }

    /// Records a rejection of a candidate currently in state `from`
    async fn reject(
        &self,
        index: u64,
        from: CandidateState,
        reason: RejectReason,
    ) -> CandidateOutcome {
        {
            let mut ledger = self.ledger.lock().await;
            if reason.pins_frontier() {
                ledger.pin(index);
            } else {
                ledger.consume(index);
                ledger.advance();
            }
        }
        self.finish_rejection(index, from, reason)
    }

    fn finish_rejection(
        &self,
        index: u64,
        from: CandidateState,
        reason: RejectReason,
    ) -> CandidateOutcome {
        self.stats.record_rejection(&reason);
        match &reason {
            RejectReason::PersistFailed(_)
            | RejectReason::CheckpointFailed(_)
            | RejectReason::WorkerPanicked(_) => {
                tracing::error!("Candidate {} not committed: {}", index, reason)
            }
            _ => tracing::debug!("Candidate {} rejected: {}", index, reason),
        }
        trace_transition(index, from, CandidateState::Rejected);
        CandidateOutcome::Rejected { index, reason }
    }

    /// Commit critical section
    ///
    /// Holding the ledger lock for the whole sequence serializes commits, so
    /// the duplicate check sees every image accepted before it.
    async fn commit(
        &self,
        index: u64,
        raw: RawImage,
        signature: PerceptualSignature,
    ) -> CandidateOutcome {
        let hash = raw.content_hash;
        let mut ledger = self.ledger.lock().await;

        if let Some(kind) = self.index.check(&hash, &signature) {
            ledger.consume(index);
            ledger.advance();
            drop(ledger);
            return self.finish_rejection(index, CandidateState::CheckingDuplicate, kind.into());
        }

        trace_transition(index, CandidateState::CheckingDuplicate, CandidateState::Persisting);
        let persisted = match self.images.persist(&hash, &raw.bytes) {
            Ok(outcome) => outcome,
            Err(e) => {
                ledger.pin(index);
                drop(ledger);
                let reason = RejectReason::PersistFailed(e.to_string());
                return self.finish_rejection(index, CandidateState::Persisting, reason);
            }
        };

        self.index.register(hash, signature);
        ledger.consume(index);

        let staged = ledger.stage_acceptance(hash);
        if let Err(e) = self.store.save(&staged) {
            // The image is on disk; keep its hash for the next save but hold
            // the frontier so a restart revisits this index
            ledger.remember_acceptance(hash);
            ledger.pin(index);
            drop(ledger);
            let reason = RejectReason::CheckpointFailed(e.to_string());
            return self.finish_rejection(index, CandidateState::Persisting, reason);
        }
        ledger.replace(staged);
        drop(ledger);

        let already_present = persisted == PersistOutcome::AlreadyPresent;
        self.stats.record_commit(already_present);
        tracing::debug!("Candidate {} committed as {}", index, hash.file_name());
        trace_transition(index, CandidateState::Persisting, CandidateState::Committed);

        CandidateOutcome::Committed {
            index,
            hash,
            already_present,
        }
    }
}

fn trace_transition(index: u64, from: CandidateState, to: CandidateState) {
    debug_assert!(
        from.can_transition_to(to),
        "candidate {}: illegal transition {} -> {}",
        index,
        from,
        to
    );
    tracing::trace!("Candidate {} {} -> {}", index, from, to);
}

/// Fetch, verify and commit one candidate
async fn process(ctx: Arc<PipelineContext>, candidate: Candidate) -> CandidateOutcome {
    let index = candidate.sequence_index;

    trace_transition(index, CandidateState::Dispatched, CandidateState::Fetching);
    let raw = match fetch_source(&ctx.client, &candidate.source_url, ctx.limits).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(
                "Fetch failed for {} ({}): {}",
                abbreviate(&candidate.source_url),
                e.label(),
                e
            );
            return ctx.reject(index, CandidateState::Fetching, e.into()).await;
        }
    };

    // Known bytes skip decoding; the commit section re-checks authoritatively
    if ctx.index.is_exact_duplicate(&raw.content_hash) {
        return ctx
            .reject(index, CandidateState::Fetching, RejectReason::ExactDuplicate)
            .await;
    }

    trace_transition(index, CandidateState::Fetching, CandidateState::Verifying);
    let verified = tokio::task::spawn_blocking(move || {
        let signature = verify_and_sign(&raw.bytes);
        (raw, signature)
    })
    .await;

    let (raw, signature) = match verified {
        Ok((raw, Ok(signature))) => (raw, signature),
        Ok((_, Err(e))) => return ctx.reject(index, CandidateState::Verifying, e.into()).await,
        Err(e) => {
            let reason = FetchError::InvalidImage(format!("decoder failed: {}", e));
            return ctx
                .reject(index, CandidateState::Verifying, reason.into())
                .await;
        }
    };

    trace_transition(index, CandidateState::Verifying, CandidateState::CheckingDuplicate);
    ctx.commit(index, raw, signature).await
}

/// Reserved worker slot; holding one guarantees a free worker
pub struct WorkerSlot(OwnedSemaphorePermit);

/// Bounded worker pool plus the shared commit state
pub struct IngestionPipeline {
    ctx: Arc<PipelineContext>,
    permits: Arc<Semaphore>,
    workers: JoinSet<CandidateOutcome>,
}

impl IngestionPipeline {
    /// Creates a pipeline running at most `max_workers` candidates at once
    pub fn new(ctx: PipelineContext, max_workers: usize) -> Self {
        Self {
            ctx: Arc::new(ctx),
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            workers: JoinSet::new(),
        }
    }

    /// Waits until a worker is free
    pub async fn acquire_slot(&self) -> HarvestResult<WorkerSlot> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| HarvestError::Pool(e.to_string()))?;
        Ok(WorkerSlot(permit))
    }

    /// Hands `candidate` to a worker
    ///
    /// The slot is released when the worker finishes, whatever the outcome.
    pub async fn dispatch(&mut self, slot: WorkerSlot, candidate: Candidate) {
        let index = candidate.sequence_index;
        self.ctx.ledger.lock().await.begin(index);
        self.ctx.stats.record_dispatch();
        tracing::trace!("Candidate {} -> {}", index, CandidateState::Dispatched);

        let ctx = Arc::clone(&self.ctx);
        self.workers.spawn(async move {
            let WorkerSlot(_permit) = slot;
            let worker_ctx = Arc::clone(&ctx);
            match tokio::spawn(process(worker_ctx, candidate)).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // The worker's last state is unknown; Dispatched can always reject
                    let reason = RejectReason::WorkerPanicked(e.to_string());
                    ctx.reject(index, CandidateState::Dispatched, reason).await
                }
            }
        });

        self.reap();
    }

    /// Records a candidate that was filtered out before dispatch
    pub async fn mark_filtered(&self, index: u64) {
        let mut ledger = self.ctx.ledger.lock().await;
        ledger.consume(index);
        ledger.advance();
        self.ctx.stats.record_rejection(&RejectReason::BelowDimensionFloor);
    }

    /// Candidates dispatched but not yet finished
    pub fn in_flight(&self) -> usize {
        self.workers.len()
    }

    /// Snapshot of the in-memory checkpoint
    pub async fn checkpoint(&self) -> CheckpointState {
        self.ctx.ledger.lock().await.checkpoint().clone()
    }

    fn reap(&mut self) {
        while let Some(result) = self.workers.try_join_next() {
            observe(result);
        }
    }

    /// Waits for every in-flight candidate and writes the final checkpoint
    ///
    /// Returns the resume index that was saved.
    pub async fn drain(mut self) -> HarvestResult<u64> {
        if !self.workers.is_empty() {
            tracing::info!("Waiting for {} in-flight candidates", self.workers.len());
        }
        while let Some(result) = self.workers.join_next().await {
            observe(result);
        }

        let mut ledger = self.ctx.ledger.lock().await;
        let staged = ledger.stage_flush();
        self.ctx.store.save(&staged)?;
        let resume_index = staged.resume_index();
        ledger.replace(staged);

        if ledger.pinned() > 0 {
            tracing::warn!(
                "{} candidates could not be committed durably; the next run resumes at {}",
                ledger.pinned(),
                resume_index
            );
        }

        Ok(resume_index)
    }
}

fn observe(result: Result<CandidateOutcome, JoinError>) {
    match result {
        Ok(outcome) => tracing::trace!(
            "Worker for candidate {} finished (committed: {})",
            outcome.index(),
            outcome.is_committed()
        ),
        // Inner task failures are already outcomes; only the wrapper lands here
        Err(e) => tracing::error!("Worker wrapper failed: {}", e),
    }
}
