//! Incremental decode batch.

use serde::{Deserialize, Serialize};

use super::{RequestGuid, SlotEntry, Slots};
use crate::tree::TokenId;

/// One request's share of a decode step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeSlot {
    pub guid: RequestGuid,
    /// Sequence position of `tokens[0]`.
    pub token_start_offset: usize,
    /// The whole prompt on a request's first step, the last token afterwards.
    pub tokens: Vec<TokenId>,
    pub max_sequence_length: usize,
}

impl DecodeSlot {
    /// True when this step processes the prompt.
    pub fn is_prompt_step(&self) -> bool {
        self.token_start_offset == 0
    }
}

impl SlotEntry for DecodeSlot {
    fn guid(&self) -> RequestGuid {
        self.guid
    }

    fn num_tokens(&self) -> usize {
        self.tokens.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeBatch {
    pub slots: Slots<DecodeSlot>,
}

impl DecodeBatch {
    pub fn new(capacity: usize) -> Self {
        Self { slots: Slots::new(capacity) }
    }

    pub fn num_tokens(&self) -> usize {
        self.slots.num_tokens()
    }
}
