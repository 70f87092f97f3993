//! Bookkeeping for the resume frontier
//!
//! Candidates complete out of order, so the checkpoint cannot simply record
//! "the last index seen". The ledger tracks which dispatched indices are
//! still open and derives the lowest index a restart must revisit:
//!
//! - while any index is in flight or pinned, the frontier is the smallest
//!   such index
//! - otherwise it is the highest consumed index
//!
//! An index is pinned when its work finished without a durable outcome
//! (image or checkpoint write failed); it holds the frontier back for the
//! rest of the run.

use crate::dedup::ContentHash;
use crate::state::CheckpointState;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    checkpoint: CheckpointState,
    in_flight: BTreeSet<u64>,
    pinned: BTreeSet<u64>,
    highest_consumed: Option<u64>,
}

impl Ledger {
    pub fn new(checkpoint: CheckpointState) -> Self {
        Self {
            checkpoint,
            ..Self::default()
        }
    }

    /// The in-memory checkpoint
    ///
    /// [`Ledger::advance`] and [`Ledger::remember_acceptance`] change it
    /// without writing anything; it is durable only once saved.
    pub fn checkpoint(&self) -> &CheckpointState {
        &self.checkpoint
    }

    /// Records that `index` has been dispatched
    pub fn begin(&mut self, index: u64) {
        self.in_flight.insert(index);
    }

    /// Records that `index` reached an outcome that needs no revisit
    pub fn consume(&mut self, index: u64) {
        self.in_flight.remove(&index);
        self.highest_consumed = Some(self.highest_consumed.map_or(index, |h| h.max(index)));
    }

    /// Records that `index` must be revisited by a later run
    pub fn pin(&mut self, index: u64) {
        self.in_flight.remove(&index);
        self.pinned.insert(index);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn pinned(&self) -> usize {
        self.pinned.len()
    }

    /// Lowest index a restarted run must begin at, if anything has been seen
    pub fn frontier(&self) -> Option<u64> {
        let lowest_open = match (self.in_flight.first(), self.pinned.first()) {
            (Some(a), Some(b)) => Some(*a.min(b)),
            (Some(a), None) => Some(*a),
            (None, Some(b)) => Some(*b),
            (None, None) => None,
        };
        lowest_open.or(self.highest_consumed)
    }

    /// Moves the in-memory resume index up to the frontier
    pub fn advance(&mut self) -> bool {
        match self.frontier() {
            Some(frontier) => self.checkpoint.advance_resume(frontier),
            None => false,
        }
    }

    /// Builds the checkpoint to write for a newly accepted image
    ///
    /// The live checkpoint is not modified; call [`Ledger::replace`] once the
    /// returned state has been saved.
    pub fn stage_acceptance(&self, hash: ContentHash) -> CheckpointState {
        let mut staged = self.checkpoint.clone();
        staged.record_acceptance(hash);
        if let Some(frontier) = self.frontier() {
            staged.advance_resume(frontier);
        }
        staged.touch();
        staged
    }

    /// Builds the checkpoint to write at the end of a run
    pub fn stage_flush(&self) -> CheckpointState {
        let mut staged = self.checkpoint.clone();
        if let Some(frontier) = self.frontier() {
            staged.advance_resume(frontier);
        }
        staged.touch();
        staged
    }

    /// Adopts a staged checkpoint that has been written successfully
    pub fn replace(&mut self, saved: CheckpointState) {
        self.checkpoint = saved;
    }

    /// Records an accepted hash without touching the resume index
    ///
    /// Used when the image is on disk but the checkpoint write failed; the
    /// next successful save carries the hash.
    pub fn remember_acceptance(&mut self, hash: ContentHash) {
        self.checkpoint.record_acceptance(hash);
    }
}
