//! Request manager: running set, admission, retirement and the decode phase.
//!
//! The manager is owned by the control loop. Everything that may be touched
//! from ingress lives in the shared [`RequestRegistry`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::Span;

use super::config::{ConfigError, SchedulerConfig};
use super::error::{RegistrationError, SchedulerError};
use super::registry::RequestRegistry;
use super::request::{FinishReason, GenerationOutput, Request, RequestStatus};
use super::slots::SlotTable;
use crate::batch::{DecodeBatch, DecodeResult, DecodeSlot, Phase, RequestGuid, SlotEntry, Slots};
use crate::engine::Tokenizer;
use crate::telemetry::{self, BatchSpan, SpanExt};
use crate::tree::{BeamTree, BeamTreeArena, TokenId};

/// Owns every running request and turns engine results into the next batch.
#[derive(Debug)]
pub struct RequestManager {
    pub(super) config: SchedulerConfig,
    pub(super) registry: Arc<RequestRegistry>,
    pub(super) running: HashMap<RequestGuid, Request>,
    pub(super) slots: SlotTable,
    pub(super) trees: BeamTreeArena,
    /// Speculative rounds started, for round-robin draft selection.
    pub(super) rounds: u64,
    completed: Vec<GenerationOutput>,
}

impl RequestManager {
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = Arc::new(RequestRegistry::new(config.max_tokens_per_batch, None));
        Ok(Self::with_registry(config, registry))
    }

    /// Manager whose registry accepts text prompts.
    pub fn with_tokenizer(
        config: SchedulerConfig,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = Arc::new(RequestRegistry::new(config.max_tokens_per_batch, Some(tokenizer)));
        Ok(Self::with_registry(config, registry))
    }

    fn with_registry(config: SchedulerConfig, registry: Arc<RequestRegistry>) -> Self {
        let capacity = config.max_requests;
        Self {
            config,
            registry,
            running: HashMap::new(),
            slots: SlotTable::new(capacity),
            trees: BeamTreeArena::new(capacity),
            rounds: 0,
            completed: Vec::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Shared registration surface. Clone the `Arc` to hand it to ingress.
    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    pub fn register(
        &self,
        prompt: Vec<TokenId>,
        max_sequence_length: usize,
    ) -> Result<RequestGuid, RegistrationError> {
        self.registry.register(prompt, max_sequence_length)
    }

    pub fn register_text(
        &self,
        prompt: &str,
        max_sequence_length: usize,
    ) -> Result<RequestGuid, RegistrationError> {
        self.registry.register_text(prompt, max_sequence_length)
    }

    pub fn request(&self, guid: RequestGuid) -> Option<&Request> {
        self.running.get(&guid)
    }

    pub fn slot_of(&self, guid: RequestGuid) -> Option<usize> {
        self.slots.slot_of(guid)
    }

    pub fn beam_tree(&self, slot: usize) -> Option<&BeamTree> {
        self.trees.get(slot)
    }

    pub fn num_running(&self) -> usize {
        self.running.len()
    }

    /// True when nothing is running or waiting.
    pub fn is_idle(&self) -> bool {
        self.running.is_empty() && self.registry.pending_len() == 0
    }

    pub fn num_processed_requests(&self) -> usize {
        self.registry.num_processed_requests()
    }

    pub fn total_request_run_time(&self) -> Duration {
        self.registry.total_request_run_time()
    }

    pub fn num_ssms(&self) -> usize {
        self.registry.num_ssms()
    }

    pub fn add_ssm(&self) -> usize {
        self.registry.add_ssm()
    }

    /// Drain outputs of requests retired since the last call.
    pub fn take_completed(&mut self) -> Vec<GenerationOutput> {
        std::mem::take(&mut self.completed)
    }

    /// Empty decode descriptor of the right capacity, for the first step.
    pub fn empty_decode_batch(&self) -> DecodeBatch {
        DecodeBatch::new(self.config.max_requests)
    }

    /// Admit pending requests FIFO while a slot is free and the head's
    /// prompt fits in `token_budget`. Returns the new `(slot, guid)` pairs.
    pub fn admit_pending_into_running(&mut self, token_budget: usize) -> Vec<(usize, RequestGuid)> {
        let mut admitted = Vec::new();
        let mut remaining = token_budget;
        while let Some(slot) = self.slots.free_slot() {
            let Some(request) = self.registry.pop_pending_if(|r| r.initial_len <= remaining) else {
                if self.registry.pending_len() > 0 {
                    tracing::trace!(remaining, "pending head waits for token budget");
                }
                break;
            };
            let guid = request.guid;
            remaining -= request.initial_len;
            self.slots.occupy(slot, guid);
            self.trees.reset(slot, request.last_token());
            self.registry.set_status(guid, RequestStatus::Running { slot });
            tracing::info!(%guid, slot, prompt_len = request.initial_len, "request admitted");
            self.running.insert(guid, request);
            admitted.push((slot, guid));
        }
        admitted
    }

    /// Remove a running request and publish its output.
    ///
    /// Returns false if the request was not running.
    pub fn retire(&mut self, guid: RequestGuid, reason: FinishReason) -> bool {
        self.finish(guid, reason, None)
    }

    pub(super) fn abort(&mut self, guid: RequestGuid, error: SchedulerError) {
        self.finish(guid, FinishReason::Aborted, Some(error.to_string()));
    }

    fn finish(&mut self, guid: RequestGuid, reason: FinishReason, error: Option<String>) -> bool {
        let Some(mut request) = self.running.remove(&guid) else {
            return false;
        };
        if let Some(slot) = self.slots.slot_of(guid) {
            self.slots.release(slot);
            if let Some(tree) = self.trees.get_mut(slot) {
                tree.clear();
            }
        }

        let profile = request.profile();
        self.registry
            .record_finished(guid, RequestStatus::Finished(reason), profile.clone());
        telemetry::record_retired(reason, profile.decoding_steps, profile.run_time);

        let generated = &request.tokens[request.initial_len.min(request.tokens.len())..];
        let text = self
            .registry
            .tokenizer()
            .and_then(|t| t.decode(generated).ok());
        match &error {
            Some(e) => tracing::error!(%guid, error = %e, "request aborted"),
            None => tracing::info!(
                %guid,
                ?reason,
                generated = generated.len(),
                steps = profile.decoding_steps,
                "request retired"
            ),
        }

        let output = GenerationOutput {
            guid,
            prompt_len: request.initial_len,
            tokens: std::mem::take(&mut request.tokens),
            text,
            finish_reason: reason,
            error: error.clone(),
            profile,
        };
        if let Some(tx) = request.response_tx.take() {
            let payload = match error {
                Some(e) => Err(e),
                None => Ok(output.clone()),
            };
            // The submitter may have stopped listening.
            let _ = tx.send(payload);
        }
        self.completed.push(output);
        true
    }

    /// Check that a descriptor describes exactly the current slot table.
    pub(super) fn check_slots<S: SlotEntry>(&self, slots: &Slots<S>) -> Result<(), SchedulerError> {
        if slots.capacity() != self.slots.capacity() {
            return Err(SchedulerError::SlotCountMismatch {
                expected: self.slots.capacity(),
                actual: slots.capacity(),
            });
        }
        for (slot, entry) in slots.occupied() {
            let guid = entry.guid();
            if !self.running.contains_key(&guid) {
                return Err(SchedulerError::UnknownRequest { slot, guid });
            }
            let assigned = self.slots.occupant(slot);
            if assigned != Some(guid) {
                return Err(SchedulerError::SlotMismatch { slot, expected: assigned, actual: guid });
            }
        }
        Ok(())
    }

    pub(super) fn record_prepared(span: &Span, phase: Phase, slots: usize, tokens: usize) {
        span.record("slots", slots);
        span.record("tokens", tokens);
        telemetry::record_batch(phase, slots, tokens);
        tracing::debug!(%phase, slots, tokens, "batch prepared");
    }

    /// Fold one decode step's tokens into the running requests and build the
    /// next decode descriptor.
    ///
    /// Every occupied slot of `old` must have a token in `result`. A request
    /// that produces the end marker or reaches its maximum length is retired
    /// and its slot refilled from the pending queue.
    pub fn prepare_next_batch(
        &mut self,
        old: &DecodeBatch,
        result: &DecodeResult,
    ) -> Result<DecodeBatch, SchedulerError> {
        let span = BatchSpan::new(Phase::Decode, "prepare_next_batch");
        let _guard = span.enter();
        let next = self.decode_step(old, result);
        span.record_result(&next);
        if let Ok(batch) = &next {
            let (slots, tokens) = (batch.slots.num_occupied(), batch.num_tokens());
            Self::record_prepared(&span, Phase::Decode, slots, tokens);
        }
        next
    }

    fn decode_step(
        &mut self,
        old: &DecodeBatch,
        result: &DecodeResult,
    ) -> Result<DecodeBatch, SchedulerError> {
        self.check_slots(&old.slots)?;
        for (slot, token) in result.tokens.iter().enumerate() {
            if token.is_some() && !old.slots.is_occupied(slot) {
                return Err(SchedulerError::UnexpectedOutput { slot });
            }
        }
        let mut produced = Vec::with_capacity(old.slots.num_occupied());
        for (slot, entry) in old.slots.occupied() {
            let token = result.get(slot).ok_or(SchedulerError::MissingOutput { slot })?;
            produced.push((entry, token));
        }

        let mut finished = Vec::new();
        for (entry, token) in produced {
            let Some(request) = self.running.get_mut(&entry.guid) else {
                continue;
            };
            request.tokens.push(token);
            request.llm_cache_len = entry.token_start_offset + entry.tokens.len();
            request.decoding_steps += 1;
            if self.config.eos_token == Some(token) {
                finished.push((entry.guid, FinishReason::EndOfSequence));
            } else if request.is_at_max_length() {
                finished.push((entry.guid, FinishReason::MaxLength));
            }
        }
        for (guid, reason) in finished {
            self.retire(guid, reason);
        }

        // One token per running request, whole prompts for new ones.
        let used = self.running.len();
        self.admit_pending_into_running(self.config.max_tokens_per_batch.saturating_sub(used));

        let mut batch = DecodeBatch::new(self.config.max_requests);
        for (slot, guid) in self.slots.active() {
            let Some(request) = self.running.get(&guid) else {
                continue;
            };
            let (token_start_offset, tokens) = if request.llm_cache_len == 0 {
                (0, request.tokens.clone())
            } else {
                let last = request.tokens.len() - 1;
                (last, vec![request.last_token()])
            };
            batch.slots.insert(
                slot,
                DecodeSlot {
                    guid,
                    token_start_offset,
                    tokens,
                    max_sequence_length: request.max_sequence_length,
                },
            );
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max_requests: usize, max_tokens: usize) -> RequestManager {
        let config = SchedulerConfig {
            max_requests,
            max_tokens_per_batch: max_tokens,
            ..Default::default()
        };
        RequestManager::new(config).unwrap()
    }

    #[test]
    fn first_step_admits_whole_prompt() {
        let mut m = manager(2, 16);
        let guid = m.register(vec![5, 6, 7], 10).unwrap();
        let batch = m
            .prepare_next_batch(&m.empty_decode_batch(), &DecodeResult::new(2))
            .unwrap();
        let slot = batch.slots.get(0).unwrap();
        assert_eq!(slot.guid, guid);
        assert_eq!(slot.tokens, vec![5, 6, 7]);
        assert!(slot.is_prompt_step());
        assert_eq!(m.registry().status(guid), Some(RequestStatus::Running { slot: 0 }));
    }

    #[test]
    fn admission_respects_token_budget() {
        let mut m = manager(2, 4);
        m.register(vec![1, 2, 3], 10).unwrap();
        m.register(vec![4, 5], 10).unwrap();
        let admitted = m.admit_pending_into_running(4);
        assert_eq!(admitted.len(), 1);
        assert_eq!(m.registry().pending_len(), 1);
    }

    #[test]
    fn missing_token_is_rejected() {
        let mut m = manager(2, 16);
        m.register(vec![1], 10).unwrap();
        let batch = m
            .prepare_next_batch(&m.empty_decode_batch(), &DecodeResult::new(2))
            .unwrap();
        let err = m.prepare_next_batch(&batch, &DecodeResult::new(2)).unwrap_err();
        assert_eq!(err, SchedulerError::MissingOutput { slot: 0 });
    }

    #[test]
    fn output_for_empty_slot_is_rejected() {
        let mut m = manager(2, 16);
        let result = DecodeResult::new(2).with_token(1, 9);
        let err = m.prepare_next_batch(&m.empty_decode_batch(), &result).unwrap_err();
        assert_eq!(err, SchedulerError::UnexpectedOutput { slot: 1 });
    }

    #[test]
    fn wrong_capacity_is_rejected() {
        let mut m = manager(2, 16);
        let err = m
            .prepare_next_batch(&DecodeBatch::new(3), &DecodeResult::new(3))
            .unwrap_err();
        assert_eq!(err, SchedulerError::SlotCountMismatch { expected: 2, actual: 3 });
    }

    #[test]
    fn retire_frees_slot_and_tree() {
        let mut m = manager(1, 16);
        let guid = m.register(vec![1, 2], 10).unwrap();
        m.admit_pending_into_running(16);
        assert!(m.retire(guid, FinishReason::MaxLength));
        assert!(!m.retire(guid, FinishReason::MaxLength));
        assert_eq!(m.slot_of(guid), None);
        assert!(m.beam_tree(0).unwrap().root().is_none());
        assert_eq!(m.num_processed_requests(), 1);
        let done = m.take_completed();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].finish_reason, FinishReason::MaxLength);
    }
}
