//! Enumeration sources
//!
//! A source yields candidates in strictly increasing sequence order and can
//! be positioned at an arbitrary index when a harvest resumes.

use crate::state::Candidate;
use async_trait::async_trait;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Enumeration failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The current candidate could not be produced; retrying may succeed
    #[error("Transient enumeration failure: {0}")]
    Transient(String),

    /// The source can produce nothing more
    #[error("Enumeration source closed: {0}")]
    Closed(String),
}

/// Producer of candidates for the orchestrator
#[async_trait]
pub trait CandidateSource: Send {
    /// Positions the source so the next candidate has `sequence_index >= start_index`
    async fn seek(&mut self, start_index: u64) -> Result<(), SourceError>;

    /// Returns the next candidate, or `None` once enumeration is exhausted
    async fn next_candidate(&mut self) -> Result<Option<Candidate>, SourceError>;

    /// Gives up on the candidate that keeps failing with a transient error
    /// and moves past it
    fn skip_current(&mut self) {}
}

/// Source over a fixed, pre-enumerated list of candidates
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    candidates: Vec<Candidate>,
    position: usize,
}

impl StaticSource {
    /// Creates a source over `candidates`, ordered by sequence index
    pub fn new(mut candidates: Vec<Candidate>) -> Self {
        candidates.sort_by_key(|c| c.sequence_index);
        Self {
            candidates,
            position: 0,
        }
    }

    /// Loads candidates from a JSON-lines file, one candidate object per line
    ///
    /// Blank lines and lines starting with `#` are ignored.
    pub fn from_json_lines(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut candidates = Vec::new();

        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let candidate: Candidate = serde_json::from_str(trimmed).map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("{}:{}: {}", path.display(), number + 1, e),
                )
            })?;
            candidates.push(candidate);
        }

        Ok(Self::new(candidates))
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }
}

#[async_trait]
impl CandidateSource for StaticSource {
    async fn seek(&mut self, start_index: u64) -> Result<(), SourceError> {
        self.position = self
            .candidates
            .partition_point(|c| c.sequence_index < start_index);
        Ok(())
    }

    async fn next_candidate(&mut self) -> Result<Option<Candidate>, SourceError> {
        let next = self.candidates.get(self.position).cloned();
        if next.is_some() {
            self.position += 1;
        }
        Ok(next)
    }
}
