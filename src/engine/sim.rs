//! Deterministic counting model.
//!
//! The "true" continuation of token `t` is `(t + 1) % vocab`. The verify and
//! decode sides always predict it; the draft side proposes it along with a
//! distractor, and can be told to guess wrong at regular sequence positions
//! so partial acceptance shows up.

use crate::batch::{
    BeamResult, DecodeBatch, DecodeResult, ExpandBatch, ExpandInput, VerifyBatch, VerifyResult,
};
use crate::tree::{BeamCandidate, TokenId};

use super::{DecodeEngine, DraftEngine, EngineError, VerifyEngine};

#[derive(Debug, Clone)]
pub struct CountingModel {
    vocab: TokenId,
    capacity: usize,
    miss_every: Option<usize>,
}

impl CountingModel {
    pub fn new(vocab: TokenId, capacity: usize) -> Self {
        Self { vocab: vocab.max(2), capacity, miss_every: None }
    }

    /// Make the draft side guess wrong whenever the proposed token's
    /// sequence position is a multiple of `n`.
    pub fn with_miss_every(mut self, n: usize) -> Self {
        self.miss_every = (n > 0).then_some(n);
        self
    }

    pub fn next_token(&self, token: TokenId) -> TokenId {
        (token + 1) % self.vocab
    }

    fn distractor(&self, token: TokenId) -> TokenId {
        (token + 1 + self.vocab / 2) % self.vocab
    }

    fn draft_guess(&self, token: TokenId, position: usize) -> TokenId {
        match self.miss_every {
            Some(n) if position % n == 0 => self.distractor(token),
            _ => self.next_token(token),
        }
    }

    fn check_capacity(&self, tokens: usize) -> Result<(), EngineError> {
        if tokens > self.capacity {
            return Err(EngineError::CapacityExceeded { tokens, capacity: self.capacity });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DecodeEngine for CountingModel {
    async fn decode(&self, batch: &DecodeBatch) -> Result<DecodeResult, EngineError> {
        self.check_capacity(batch.num_tokens())?;
        let mut result = DecodeResult::new(batch.slots.capacity());
        for (slot, entry) in batch.slots.occupied() {
            let last = entry.tokens.last().copied().unwrap_or_default();
            result.set(slot, self.next_token(last));
        }
        Ok(result)
    }
}

#[async_trait::async_trait]
impl DraftEngine for CountingModel {
    async fn expand(&self, batch: &ExpandBatch) -> Result<BeamResult, EngineError> {
        let mut result = BeamResult::new(batch.slots.capacity());
        for (slot, entry) in batch.slots.occupied() {
            if !entry.is_expanding() {
                continue;
            }
            let candidates: Vec<BeamCandidate> = match &entry.input {
                ExpandInput::Prefix { token_start_offset, tokens, .. } => {
                    let Some(&root) = tokens.last() else {
                        continue;
                    };
                    let position = token_start_offset + tokens.len();
                    vec![
                        BeamCandidate::new(self.draft_guess(root, position), -0.1, 0),
                        BeamCandidate::new(self.distractor(root), -2.3, 0),
                    ]
                }
                ExpandInput::Frontier { position, nodes } => nodes
                    .iter()
                    .enumerate()
                    .map(|(i, n)| {
                        let guess = self.draft_guess(n.token_id, position + 1);
                        BeamCandidate::new(guess, n.log_prob - 0.1, i)
                    })
                    .collect(),
                ExpandInput::Idle => continue,
            };
            result.set(slot, candidates.into_iter().take(entry.beam_width).collect());
        }
        Ok(result)
    }
}

#[async_trait::async_trait]
impl VerifyEngine for CountingModel {
    async fn verify(&self, batch: &VerifyBatch) -> Result<VerifyResult, EngineError> {
        self.check_capacity(batch.num_tokens())?;
        let mut result = VerifyResult::new(batch.slots.capacity());
        for (slot, entry) in batch.slots.occupied() {
            let predictions = entry.tree.iter().map(|n| self.next_token(n.token_id)).collect();
            result.set(slot, predictions);
        }
        Ok(result)
    }
}
