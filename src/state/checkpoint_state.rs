//! Durable harvest progress
//!
//! This is the in-memory form of the checkpoint file. Hashes are never
//! removed and the resume index never moves backwards.

use crate::dedup::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Accepted content hashes plus the enumeration position to resume from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Every content hash whose image has been kept
    #[serde(rename = "processed_hashes")]
    accepted_hashes: BTreeSet<ContentHash>,

    /// Sequence index a restarted run asks the source to begin at (inclusive)
    #[serde(rename = "last_index")]
    resume_index: u64,

    /// When this state was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl CheckpointState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepted_hashes(&self) -> &BTreeSet<ContentHash> {
        &self.accepted_hashes
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted_hashes.len()
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.accepted_hashes.contains(hash)
    }

    /// Adds an accepted hash, returning true if it was not already present
    pub fn record_acceptance(&mut self, hash: ContentHash) -> bool {
        self.accepted_hashes.insert(hash)
    }

    pub fn resume_index(&self) -> u64 {
        self.resume_index
    }

    /// Moves the resume index forward to `index`
    ///
    /// Returns false and leaves the state untouched if `index` is behind the
    /// current resume index.
    pub fn advance_resume(&mut self, index: u64) -> bool {
        if index > self.resume_index {
            self.resume_index = index;
            true
        } else {
            false
        }
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Stamps the state with the current time before it is written
    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}
