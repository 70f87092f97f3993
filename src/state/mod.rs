//! State module for tracking harvest progress
//!
//! # Components
//!
//! - `Candidate`: one image reference yielded by the enumeration source
//! - `CandidateState`: where a candidate is in the ingestion pipeline
//! - `RejectReason`: why a candidate was dropped
//! - `CheckpointState`: accepted hashes and the resume index, persisted between runs

mod candidate;
mod candidate_state;
mod checkpoint_state;

// Re-export main types
pub use candidate::Candidate;
pub use candidate_state::{CandidateState, RejectReason};
pub use checkpoint_state::CheckpointState;
