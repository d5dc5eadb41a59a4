//! Speculative-expand batch driven by a draft model.

use serde::{Deserialize, Serialize};

use super::{CommittedToken, RequestGuid, SlotEntry, Slots};
use crate::tree::TokenId;

/// Frontier node the draft model extends this step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrontierToken {
    pub token_id: TokenId,
    /// Index of this node's parent in the previous layer.
    pub parent: usize,
    pub log_prob: f32,
}

/// What the draft model processes for one slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpandInput {
    /// First step of a round: confirmed tokens not yet seen by the draft
    /// model. The last one is the tree root, candidates extend it.
    Prefix {
        token_start_offset: usize,
        tokens: Vec<TokenId>,
        committed: Vec<CommittedToken>,
    },
    /// Later steps: every node of the current frontier layer, all at the
    /// same sequence position.
    Frontier {
        position: usize,
        nodes: Vec<FrontierToken>,
    },
    /// Expansion finished for this round.
    Idle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandSlot {
    pub guid: RequestGuid,
    pub beam_width: usize,
    /// Depth of the frontier being extended.
    pub beam_depth: usize,
    /// Depth at which expansion stops this round.
    pub max_depth: usize,
    pub input: ExpandInput,
}

impl ExpandSlot {
    /// True while the slot still wants candidates from the draft model.
    pub fn is_expanding(&self) -> bool {
        self.beam_depth < self.max_depth && !matches!(self.input, ExpandInput::Idle)
    }
}

impl SlotEntry for ExpandSlot {
    fn guid(&self) -> RequestGuid {
        self.guid
    }

    fn num_tokens(&self) -> usize {
        match &self.input {
            ExpandInput::Prefix { tokens, .. } => tokens.len(),
            ExpandInput::Frontier { nodes, .. } => nodes.len(),
            ExpandInput::Idle => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandBatch {
    /// Draft model that drives this round.
    pub ssm_id: usize,
    pub slots: Slots<ExpandSlot>,
}

impl ExpandBatch {
    pub fn new(capacity: usize, ssm_id: usize) -> Self {
        Self { ssm_id, slots: Slots::new(capacity) }
    }

    pub fn num_tokens(&self) -> usize {
        self.slots.num_tokens()
    }

    /// True once no occupied slot wants further expansion.
    pub fn is_complete(&self) -> bool {
        self.slots.occupied().all(|(_, s)| !s.is_expanding())
    }
}
