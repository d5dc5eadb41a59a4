//! Tree-verify batch evaluated by the verify model in one pass.

use serde::{Deserialize, Serialize};

use super::{RequestGuid, SlotEntry, Slots};
use crate::tree::{TokenId, TokenTreeNode};

/// A tree node accepted by the previous verify pass.
///
/// The engine keeps the cache entry computed at `tree_index` of that pass
/// and files it under sequence `position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedToken {
    pub position: usize,
    pub depth: usize,
    pub tree_index: usize,
    pub token_id: TokenId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifySlot {
    pub guid: RequestGuid,
    /// Sequence position of `prefix[0]`.
    pub token_start_offset: usize,
    /// Confirmed tokens preceding the root that the verify model has not
    /// processed yet (the prompt body on a request's first round).
    pub prefix: Vec<TokenId>,
    /// Sequence position of the tree root.
    pub root_position: usize,
    /// Breadth-first candidate tree, root first.
    pub tree: Vec<TokenTreeNode>,
    pub committed: Vec<CommittedToken>,
}

impl VerifySlot {
    /// Sequence position of a tree node.
    pub fn position_of(&self, tree_index: usize) -> Option<usize> {
        self.tree.get(tree_index).map(|n| self.root_position + n.depth)
    }
}

impl SlotEntry for VerifySlot {
    fn guid(&self) -> RequestGuid {
        self.guid
    }

    fn num_tokens(&self) -> usize {
        self.prefix.len() + self.tree.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyBatch {
    pub slots: Slots<VerifySlot>,
}

impl VerifyBatch {
    pub fn new(capacity: usize) -> Self {
        Self { slots: Slots::new(capacity) }
    }

    pub fn num_tokens(&self) -> usize {
        self.slots.num_tokens()
    }
}
