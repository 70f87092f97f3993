//! Lifecycle of a candidate inside the ingestion pipeline
//!
//! `Dispatched -> Fetching -> Verifying -> CheckingDuplicate -> Persisting -> Committed`,
//! with an exit to `Rejected` from every non-terminal state.

use crate::crawler::FetchError;
use crate::dedup::DuplicateKind;
use std::fmt;

/// Represents where a candidate is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateState {
    // ===== Active States =====
    /// Accepted by the pool, waiting for a worker
    Dispatched,

    /// Payload is being downloaded or decoded from its inline form
    Fetching,

    /// Payload is being checked for structural validity and signed
    Verifying,

    /// Inside the commit critical section, consulting the duplicate index
    CheckingDuplicate,

    /// Writing the image file
    Persisting,

    // ===== Terminal States =====
    /// Image kept and checkpoint flushed
    Committed,

    /// Dropped; see the accompanying [`RejectReason`]
    Rejected,
}

impl CandidateState {
    /// Returns true if no further processing happens in this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Rejected)
    }

    /// Returns true if `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: CandidateState) -> bool {
        use CandidateState::*;
        match (self, next) {
            (from, Rejected) => !from.is_terminal(),
            (Dispatched, Fetching)
            | (Fetching, Verifying)
            | (Verifying, CheckingDuplicate)
            | (CheckingDuplicate, Persisting)
            | (Persisting, Committed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatched => "dispatched",
            Self::Fetching => "fetching",
            Self::Verifying => "verifying",
            Self::CheckingDuplicate => "checking_duplicate",
            Self::Persisting => "persisting",
            Self::Committed => "committed",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a candidate did not end up committed
#[derive(Debug)]
pub enum RejectReason {
    /// Declared dimensions absent or under the floor; never dispatched
    BelowDimensionFloor,

    /// Fetch & verify failed
    Fetch(FetchError),

    /// Byte-identical to an accepted image
    ExactDuplicate,

    /// Visually within the threshold of an accepted image
    NearDuplicate { distance: u32 },

    /// The image file could not be written
    PersistFailed(String),

    /// The image was written but the checkpoint could not be saved
    CheckpointFailed(String),

    /// The worker task ended abnormally
    WorkerPanicked(String),
}

impl RejectReason {
    /// Returns true when the candidate's outcome is not durable and its index
    /// must hold back the resume frontier
    pub fn pins_frontier(&self) -> bool {
        matches!(
            self,
            Self::PersistFailed(_) | Self::CheckpointFailed(_) | Self::WorkerPanicked(_)
        )
    }

    /// Short machine-friendly label, used in logs and statistics
    pub fn label(&self) -> &'static str {
        match self {
            Self::BelowDimensionFloor => "below_dimension_floor",
            Self::Fetch(error) => error.label(),
            Self::ExactDuplicate => "exact_duplicate",
            Self::NearDuplicate { .. } => "near_duplicate",
            Self::PersistFailed(_) => "persist_failed",
            Self::CheckpointFailed(_) => "checkpoint_failed",
            Self::WorkerPanicked(_) => "worker_panicked",
        }
    }
}

impl From<DuplicateKind> for RejectReason {
    fn from(kind: DuplicateKind) -> Self {
        match kind {
            DuplicateKind::Exact => Self::ExactDuplicate,
            DuplicateKind::Near { distance } => Self::NearDuplicate { distance },
        }
    }
}

impl From<FetchError> for RejectReason {
    fn from(error: FetchError) -> Self {
        Self::Fetch(error)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BelowDimensionFloor => write!(f, "declared dimensions below floor"),
            Self::Fetch(error) => write!(f, "{}", error),
            Self::ExactDuplicate => write!(f, "exact duplicate"),
            Self::NearDuplicate { distance } => {
                write!(f, "near duplicate (distance {})", distance)
            }
            Self::PersistFailed(message) => write!(f, "persist failed: {}", message),
            Self::CheckpointFailed(message) => write!(f, "checkpoint save failed: {}", message),
            Self::WorkerPanicked(message) => write!(f, "worker ended abnormally: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!CandidateState::Dispatched.is_terminal());
        assert!(!CandidateState::Fetching.is_terminal());
        assert!(!CandidateState::Verifying.is_terminal());
        assert!(!CandidateState::CheckingDuplicate.is_terminal());
        assert!(!CandidateState::Persisting.is_terminal());

        assert!(CandidateState::Committed.is_terminal());
        assert!(CandidateState::Rejected.is_terminal());
    }

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            CandidateState::Dispatched,
            CandidateState::Fetching,
            CandidateState::Verifying,
            CandidateState::CheckingDuplicate,
            CandidateState::Persisting,
            CandidateState::Committed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_reject_from_any_active_state() {
        for state in [
            CandidateState::Dispatched,
            CandidateState::Fetching,
            CandidateState::Verifying,
            CandidateState::CheckingDuplicate,
            CandidateState::Persisting,
        ] {
            assert!(state.can_transition_to(CandidateState::Rejected));
        }
        assert!(!CandidateState::Committed.can_transition_to(CandidateState::Rejected));
        assert!(!CandidateState::Rejected.can_transition_to(CandidateState::Rejected));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!CandidateState::Dispatched.can_transition_to(CandidateState::Persisting));
        assert!(!CandidateState::Committed.can_transition_to(CandidateState::Fetching));
        assert!(!CandidateState::Verifying.can_transition_to(CandidateState::Committed));
    }

    #[test]
    fn test_pins_frontier() {
        assert!(RejectReason::PersistFailed("disk full".into()).pins_frontier());
        assert!(RejectReason::CheckpointFailed("disk full".into()).pins_frontier());
        assert!(!RejectReason::ExactDuplicate.pins_frontier());
        assert!(!RejectReason::NearDuplicate { distance: 2 }.pins_frontier());
        assert!(!RejectReason::BelowDimensionFloor.pins_frontier());
    }

    #[test]
    fn test_from_duplicate_kind() {
        assert!(matches!(
            RejectReason::from(DuplicateKind::Near { distance: 3 }),
            RejectReason::NearDuplicate { distance: 3 }
        ));
        assert_eq!(RejectReason::from(DuplicateKind::Exact).label(), "exact_duplicate");
    }
}
