//! Parent-indexed tree node used in serialized trees.

use serde::{Deserialize, Serialize};

use super::TokenId;

/// One candidate token in a flattened candidate tree.
///
/// `parent_id` indexes into the same flattened list; only the root (depth 0)
/// has no parent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenTreeNode {
    pub token_id: TokenId,
    pub parent_id: Option<usize>,
    /// Log-probability assigned by the draft model (0.0 for the root).
    pub prob: f32,
    pub depth: usize,
}

impl TokenTreeNode {
    /// Root node for a tree grown from `token_id`.
    pub fn root(token_id: TokenId) -> Self {
        Self { token_id, parent_id: None, prob: 0.0, depth: 0 }
    }

    pub fn new(token_id: TokenId, parent_id: usize, prob: f32, depth: usize) -> Self {
        Self { token_id, parent_id: Some(parent_id), prob, depth }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}
