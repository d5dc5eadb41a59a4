//! Speculative token-tree model.
//!
//! Each in-flight request owns a candidate tree rooted at its last confirmed
//! token. The tree is grown one layer per expansion step inside a
//! fixed-capacity grid (`MAX_BEAM_DEPTH` x `MAX_BEAM_WIDTH`), flattened
//! breadth-first for the verify pass, and reconciled against the verify
//! model's predictions by [`accept_longest_path`].

mod beam;
mod node;
mod verify;

pub use beam::{BeamCandidate, BeamNode, BeamTree, BeamTreeArena, TreeLayer};
pub use node::TokenTreeNode;
pub use verify::{accept_longest_path, AcceptedPath};

use thiserror::Error;

/// Vocabulary index produced and consumed by the models.
pub type TokenId = u32;

/// Maximum number of candidates held in one tree layer.
pub const MAX_BEAM_WIDTH: usize = 3;

/// Maximum number of layers grown below the root.
pub const MAX_BEAM_DEPTH: usize = 8;

/// Tree-shape and capacity violations.
///
/// These indicate that the compute engine and the scheduler disagree about
/// the shape of a batch. They are rejected, never truncated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("layer {depth} would hold {count} candidates (capacity {capacity})")]
    LayerFull {
        depth: usize,
        count: usize,
        capacity: usize,
    },

    #[error("tree depth {depth} exceeds maximum {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("node at depth {depth} references parent {parent}, which is not occupied")]
    OrphanParent { depth: usize, parent: usize },

    #[error("tree has no root")]
    MissingRoot,

    #[error("expected {expected} predictions, got {actual}")]
    PredictionCount { expected: usize, actual: usize },
}
