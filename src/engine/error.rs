//! Compute-engine error types.

use thiserror::Error;

/// Failures reported by engine implementations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Batch of {tokens} tokens exceeds engine capacity of {capacity}")]
    CapacityExceeded { tokens: usize, capacity: usize },

    #[error("Draft model {0} is not loaded")]
    DraftNotLoaded(usize),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl EngineError {
    /// True when the batch shape, not the engine, is at fault.
    pub fn is_shape_error(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}
