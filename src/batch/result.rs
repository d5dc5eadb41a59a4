//! Compute-engine outputs handed back to the scheduler.
//!
//! Every result is indexed by slot, mirroring the descriptor it answers.
//! Unoccupied slots carry no output.

use serde::{Deserialize, Serialize};

use crate::tree::{BeamCandidate, TokenId};

/// One sampled token per occupied decode slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeResult {
    pub tokens: Vec<Option<TokenId>>,
}

impl DecodeResult {
    pub fn new(capacity: usize) -> Self {
        Self { tokens: vec![None; capacity] }
    }

    pub fn with_token(mut self, slot: usize, token: TokenId) -> Self {
        self.set(slot, token);
        self
    }

    pub fn set(&mut self, slot: usize, token: TokenId) {
        if slot >= self.tokens.len() {
            self.tokens.resize(slot + 1, None);
        }
        self.tokens[slot] = Some(token);
    }

    pub fn get(&self, slot: usize) -> Option<TokenId> {
        self.tokens.get(slot).copied().flatten()
    }
}

/// Up to `beam_width` candidates per occupied expand slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeamResult {
    pub candidates: Vec<Vec<BeamCandidate>>,
}

impl BeamResult {
    pub fn new(capacity: usize) -> Self {
        Self { candidates: vec![Vec::new(); capacity] }
    }

    pub fn with_candidates(mut self, slot: usize, candidates: Vec<BeamCandidate>) -> Self {
        self.set(slot, candidates);
        self
    }

    pub fn set(&mut self, slot: usize, candidates: Vec<BeamCandidate>) {
        if slot >= self.candidates.len() {
            self.candidates.resize(slot + 1, Vec::new());
        }
        self.candidates[slot] = candidates;
    }

    pub fn get(&self, slot: usize) -> &[BeamCandidate] {
        self.candidates.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Verify model predictions: one token per tree node, in the submitted
/// breadth-first order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub predictions: Vec<Vec<TokenId>>,
}

impl VerifyResult {
    pub fn new(capacity: usize) -> Self {
        Self { predictions: vec![Vec::new(); capacity] }
    }

    pub fn with_predictions(mut self, slot: usize, predictions: Vec<TokenId>) -> Self {
        self.set(slot, predictions);
        self
    }

    pub fn set(&mut self, slot: usize, predictions: Vec<TokenId>) {
        if slot >= self.predictions.len() {
            self.predictions.resize(slot + 1, Vec::new());
        }
        self.predictions[slot] = predictions;
    }

    pub fn get(&self, slot: usize) -> &[TokenId] {
        self.predictions.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }
}
