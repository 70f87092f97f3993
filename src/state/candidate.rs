use serde::{Deserialize, Serialize};

/// One discovered image reference awaiting a keep/drop decision
///
/// Produced by the enumeration source in strictly increasing
/// `sequence_index` order and consumed exactly once by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Position of this candidate in the enumeration order
    pub sequence_index: u64,

    /// Remote URL or inline `data:` payload
    pub source_url: String,

    /// Width reported by the enumeration source, in pixels
    #[serde(default)]
    pub declared_width: Option<u32>,

    /// Height reported by the enumeration source, in pixels
    #[serde(default)]
    pub declared_height: Option<u32>,
}

impl Candidate {
    pub fn new(sequence_index: u64, source_url: impl Into<String>) -> Self {
        Self {
            sequence_index,
            source_url: source_url.into(),
            declared_width: None,
            declared_height: None,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.declared_width = Some(width);
        self.declared_height = Some(height);
        self
    }

    /// Returns true if both declared dimensions are present and at least `min`
    pub fn meets_dimension_floor(&self, min: u32) -> bool {
        match (self.declared_width, self.declared_height) {
            (Some(width), Some(height)) => width >= min && height >= min,
            _ => false,
        }
    }

    /// True for self-contained `data:` payloads
    pub fn is_inline(&self) -> bool {
        self.source_url.starts_with("data:")
    }
}
