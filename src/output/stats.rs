//! Harvest statistics
//!
//! Live counters are updated by the orchestrator and the workers while a run
//! is in progress; [`CheckpointSummary`] describes a harvest at rest from the
//! files it left behind.

use crate::config::Config;
use crate::state::{CheckpointState, RejectReason};
use crate::storage::{CheckpointStore, ImageStore, JsonCheckpointStore};
use crate::HarvestResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every task of a run
#[derive(Debug, Default)]
pub struct HarvestStats {
    enumerated: AtomicU64,
    enumeration_skipped: AtomicU64,
    out_of_order: AtomicU64,
    filtered: AtomicU64,
    dispatched: AtomicU64,
    committed: AtomicU64,
    already_present: AtomicU64,
    exact_duplicates: AtomicU64,
    near_duplicates: AtomicU64,
    fetch_failures: AtomicU64,
    persist_failures: AtomicU64,
    checkpoint_failures: AtomicU64,
    worker_failures: AtomicU64,
}

impl HarvestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enumerated(&self) {
        self.enumerated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enumeration_skip(&self) {
        self.enumeration_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_out_of_order(&self) {
        self.out_of_order.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a committed candidate; `already_present` marks a file that a
    /// previous run had written before the checkpoint caught up
    pub fn record_commit(&self, already_present: bool) {
        self.committed.fetch_add(1, Ordering::Relaxed);
        if already_present {
            self.already_present.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rejection(&self, reason: &RejectReason) {
        let counter = match reason {
            RejectReason::BelowDimensionFloor => &self.filtered,
            RejectReason::Fetch(_) => &self.fetch_failures,
            RejectReason::ExactDuplicate => &self.exact_duplicates,
            RejectReason::NearDuplicate { .. } => &self.near_duplicates,
            RejectReason::PersistFailed(_) => &self.persist_failures,
            RejectReason::CheckpointFailed(_) => &self.checkpoint_failures,
            RejectReason::WorkerPanicked(_) => &self.worker_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            enumerated: load(&self.enumerated),
            enumeration_skipped: load(&self.enumeration_skipped),
            out_of_order: load(&self.out_of_order),
            filtered: load(&self.filtered),
            dispatched: load(&self.dispatched),
            committed: load(&self.committed),
            already_present: load(&self.already_present),
            exact_duplicates: load(&self.exact_duplicates),
            near_duplicates: load(&self.near_duplicates),
            fetch_failures: load(&self.fetch_failures),
            persist_failures: load(&self.persist_failures),
            checkpoint_failures: load(&self.checkpoint_failures),
            worker_failures: load(&self.worker_failures),
        }
    }
}

/// Point-in-time copy of [`HarvestStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub enumerated: u64,
    pub enumeration_skipped: u64,
    pub out_of_order: u64,
    pub filtered: u64,
    pub dispatched: u64,
    pub committed: u64,
    pub already_present: u64,
    pub exact_duplicates: u64,
    pub near_duplicates: u64,
    pub fetch_failures: u64,
    pub persist_failures: u64,
    pub checkpoint_failures: u64,
    pub worker_failures: u64,
}

impl StatsSnapshot {
    /// Dispatched candidates that did not end committed
    pub fn rejected(&self) -> u64 {
        self.exact_duplicates
            + self.near_duplicates
            + self.fetch_failures
            + self.persist_failures
            + self.checkpoint_failures
            + self.worker_failures
    }

    /// Candidates that reached a final outcome, filtered ones included
    pub fn consumed(&self) -> u64 {
        self.filtered + self.committed + self.rejected()
    }
}

/// Prints run statistics to stdout
pub fn print_statistics(stats: &StatsSnapshot) {
    println!("=== Harvest Statistics ===\n");

    println!("Enumeration:");
    println!("  Candidates enumerated: {}", stats.enumerated);
    println!("  Skipped after retries: {}", stats.enumeration_skipped);
    if stats.out_of_order > 0 {
        println!("  Dropped (out of order): {}", stats.out_of_order);
    }
    println!("  Below dimension floor: {}", stats.filtered);
    println!();

    println!("Outcomes:");
    println!("  Dispatched: {}", stats.dispatched);
    println!("  Committed: {}", stats.committed);
    if stats.already_present > 0 {
        println!("    (file already on disk: {})", stats.already_present);
    }
    println!("  Exact duplicates: {}", stats.exact_duplicates);
    println!("  Near duplicates: {}", stats.near_duplicates);
    println!("  Fetch/verify failures: {}", stats.fetch_failures);
    println!();

    let durability_failures =
        stats.persist_failures + stats.checkpoint_failures + stats.worker_failures;
    if durability_failures > 0 {
        println!("Failures needing a rerun:");
        println!("  Image write failures: {}", stats.persist_failures);
        println!("  Checkpoint save failures: {}", stats.checkpoint_failures);
        println!("  Worker failures: {}", stats.worker_failures);
        println!();
    }

    let acceptance_rate = if stats.dispatched > 0 {
        (stats.committed as f64 / stats.dispatched as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Acceptance Rate: {:.1}% ({} / {} dispatched candidates kept)",
        acceptance_rate, stats.committed, stats.dispatched
    );
}

/// State of a harvest on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointSummary {
    pub accepted_hashes: usize,
    pub resume_index: u64,
    pub updated_at: Option<DateTime<Utc>>,
    pub stored_images: usize,
}

impl CheckpointSummary {
    pub fn from_state(state: &CheckpointState, stored_images: usize) -> Self {
        Self {
            accepted_hashes: state.accepted_count(),
            resume_index: state.resume_index(),
            updated_at: state.updated_at(),
            stored_images,
        }
    }
}

/// Reads the checkpoint and image directory named by `config`
///
/// A missing checkpoint or image directory reads as an empty harvest.
pub fn load_checkpoint_summary(config: &Config) -> HarvestResult<CheckpointSummary> {
    let state = JsonCheckpointStore::new(&config.output.checkpoint_path).load()?;

    let images = ImageStore::new(&config.output.image_dir);
    let stored_images = if images.dir().is_dir() {
        images.count()?
    } else {
        0
    };

    Ok(CheckpointSummary::from_state(&state, stored_images))
}

/// Prints a [`CheckpointSummary`] to stdout
pub fn print_checkpoint_summary(summary: &CheckpointSummary) {
    println!("=== Checkpoint ===\n");
    println!("  Accepted hashes: {}", summary.accepted_hashes);
    println!("  Images on disk: {}", summary.stored_images);
    println!("  Resume index: {}", summary.resume_index);
    match summary.updated_at {
        Some(at) => println!("  Last saved: {}", at.to_rfc3339()),
        None => println!("  Last saved: unknown"),
    }

    if summary.stored_images != summary.accepted_hashes {
        println!();
        println!(
            "Note: image count and checkpoint differ; the next run reconciles them."
        );
    }
}
