//! Speculative rounds: expand the candidate trees, verify them in one pass,
//! commit the longest accepted path and start the next round.
//!
//! A round is `prepare_next_batch_init` (one expand descriptor), then
//! `prepare_next_batch_beam` until the expand descriptor is complete, then
//! `prepare_next_batch_verify`. The verify result is handed back to the next
//! `prepare_next_batch_init`.

use super::config::SsmSelection;
use super::error::SchedulerError;
use super::manager::RequestManager;
use super::request::{FinishReason, Request, VerifyState};
use crate::batch::{
    BeamResult, CommittedToken, ExpandBatch, ExpandInput, ExpandSlot, FrontierToken, Phase,
    RequestGuid, VerifyBatch, VerifyResult, VerifySlot,
};
use crate::telemetry::{self, BatchSpan, SpanExt};
use crate::tree::{accept_longest_path, TokenId, TokenTreeNode, TreeError};

/// Tokens committed by one verify pass, plus the verify model's own
/// continuation after the last of them.
struct Commit {
    tokens: Vec<(TokenId, usize)>,
    bonus: TokenId,
}

/// Commit the longest accepted path of `input` into `request`.
///
/// Only a pending verify pass can be committed, and only against the
/// confirmed token it was rooted at. Nothing changes on error.
fn commit_tree(
    request: &mut Request,
    input: &[TokenTreeNode],
    predictions: &[TokenId],
) -> Result<Commit, SchedulerError> {
    let guid = request.guid;
    if request.verify_state != VerifyState::Pending {
        return Err(SchedulerError::NoVerifyPending(guid));
    }
    let root_position = request.verify_root_position;
    if let Some(root) = input.first() {
        match request.tokens.get(root_position) {
            Some(&expected) if expected == root.token_id => {}
            expected => {
                return Err(SchedulerError::VerifyRootMismatch {
                    guid,
                    position: root_position,
                    expected: expected.copied().unwrap_or_default(),
                    actual: root.token_id,
                })
            }
        }
    }
    let path = accept_longest_path(input, predictions)
        .map_err(|source| SchedulerError::Tree { guid, source })?;

    request.tokens.truncate(root_position + 1);
    request.committed_tokens.clear();
    let mut tokens = Vec::with_capacity(path.len());
    for &index in &path.nodes {
        let node = &input[index];
        let position = root_position + node.depth;
        request.tokens.push(node.token_id);
        request.committed_tokens.push(CommittedToken {
            position,
            depth: node.depth,
            tree_index: index,
            token_id: node.token_id,
        });
        tokens.push((node.token_id, position));
    }
    request.llm_cache_len = root_position + 1 + path.len();
    request.decoding_steps += 1;
    request.verify_state = VerifyState::Reconciled { bonus: path.bonus };
    telemetry::record_verification(input.len(), path.len());
    Ok(Commit { tokens, bonus: path.bonus })
}

/// Split `budget` between slots that each want `wants[i]` extra tokens:
/// an equal share first, then leftovers greedily in slot order.
fn share_budget(wants: &[usize], budget: usize) -> Vec<usize> {
    if wants.is_empty() {
        return Vec::new();
    }
    let fair = budget / wants.len();
    let mut allot: Vec<usize> = wants.iter().map(|&w| w.min(fair)).collect();
    let mut left = budget - allot.iter().sum::<usize>();
    for (a, &w) in allot.iter_mut().zip(wants) {
        if left == 0 {
            break;
        }
        let extra = (w - *a).min(left);
        *a += extra;
        left -= extra;
    }
    allot
}

impl RequestManager {
    /// Reconcile the last verify pass and start a new round.
    ///
    /// Pass an empty `VerifyBatch` of the right capacity to start the very
    /// first round. Every request that survives gets its tree re-rooted at
    /// its last confirmed token; pending requests are admitted into free
    /// slots while the token budget allows.
    pub fn prepare_next_batch_init(
        &mut self,
        old: &VerifyBatch,
        result: &VerifyResult,
    ) -> Result<ExpandBatch, SchedulerError> {
        let span = BatchSpan::new(Phase::Expand, "prepare_next_batch_init");
        let _guard = span.enter();
        let next = self.init_round(old, result);
        span.record_result(&next);
        if let Ok(batch) = &next {
            let (slots, tokens) = (batch.slots.num_occupied(), batch.num_tokens());
            Self::record_prepared(&span, Phase::Expand, slots, tokens);
        }
        next
    }

    fn init_round(
        &mut self,
        old: &VerifyBatch,
        result: &VerifyResult,
    ) -> Result<ExpandBatch, SchedulerError> {
        self.check_slots(&old.slots)?;
        for (slot, predictions) in result.predictions.iter().enumerate() {
            if !predictions.is_empty() && !old.slots.is_occupied(slot) {
                return Err(SchedulerError::UnexpectedOutput { slot });
            }
        }
        for (slot, _) in old.slots.occupied() {
            if result.get(slot).is_empty() {
                return Err(SchedulerError::MissingOutput { slot });
            }
        }

        for (_, entry) in old.slots.occupied() {
            let state = self.running.get(&entry.guid).map(|r| r.verify_state);
            if state == Some(VerifyState::Idle) {
                return Err(SchedulerError::NoVerifyPending(entry.guid));
            }
        }

        let mut finished = Vec::new();
        let mut aborted = Vec::new();
        for (slot, entry) in old.slots.occupied() {
            let guid = entry.guid;
            let Some(request) = self.running.get_mut(&guid) else {
                continue;
            };
            let state = request.verify_state;
            let bonus = match state {
                VerifyState::Reconciled { bonus } => Ok(bonus),
                _ => {
                    let input = std::mem::take(&mut request.verify_tree_input);
                    let commit = commit_tree(request, &input, result.get(slot));
                    request.verify_tree_input = input;
                    commit.map(|commit| {
                        tracing::trace!(%guid, accepted = commit.tokens.len(), "tree verified");
                        commit.bonus
                    })
                }
            };
            match bonus {
                Ok(bonus) => {
                    if let Some(reason) = self.apply_commit_limits(guid, bonus) {
                        finished.push((guid, reason));
                    }
                }
                Err(err) => aborted.push((guid, err)),
            }
        }
        for (guid, err) in aborted {
            self.abort(guid, err);
        }
        for (guid, reason) in finished {
            self.retire(guid, reason);
        }

        let used: usize = self.running.values().map(Self::catch_up_len).sum();
        self.admit_pending_into_running(self.config.max_tokens_per_batch.saturating_sub(used));

        let ssm_id = self.select_ssm();
        let mut batch = ExpandBatch::new(self.config.max_requests, ssm_id);
        if self.running.is_empty() {
            return Ok(batch);
        }
        self.rounds += 1;

        let bonus = usize::from(self.config.commit_bonus_token);
        for (slot, guid) in self.slots.active() {
            let Some(request) = self.running.get_mut(&guid) else {
                continue;
            };
            let root = request.last_token();
            self.trees.reset(slot, root);
            request.beam_width = self.config.beam_width;
            request.beam_depth = 0;
            request.max_depth = self
                .config
                .beam_depth
                .min(request.remaining().saturating_sub(bonus));
            request.beam_tree = vec![TokenTreeNode::root(root)];

            let start = request.ssm_cache_len.min(request.tokens.len().saturating_sub(1));
            batch.slots.insert(
                slot,
                ExpandSlot {
                    guid,
                    beam_width: request.beam_width,
                    beam_depth: 0,
                    max_depth: request.max_depth,
                    input: ExpandInput::Prefix {
                        token_start_offset: start,
                        tokens: request.tokens[start..].to_vec(),
                        committed: request.committed_tokens.clone(),
                    },
                },
            );
        }
        Ok(batch)
    }

    /// Apply the end marker, the bonus token and the length cap after a
    /// commit. Returns why the request finished, if it did.
    fn apply_commit_limits(&mut self, guid: RequestGuid, bonus: TokenId) -> Option<FinishReason> {
        let eos = self.config.eos_token;
        let request = self.running.get_mut(&guid)?;
        request.verify_state = VerifyState::Idle;
        let fresh = request.verify_root_position + 1;
        let mut reason = None;

        if let Some(eos) = eos {
            let from = fresh.min(request.tokens.len());
            let at = request.tokens[from..].iter().position(|&t| t == eos);
            if let Some(at) = at {
                request.tokens.truncate(from + at + 1);
                reason = Some(FinishReason::EndOfSequence);
            }
        }
        if reason.is_none() && self.config.commit_bonus_token {
            request.tokens.push(bonus);
            if eos == Some(bonus) {
                reason = Some(FinishReason::EndOfSequence);
            }
        }
        if request.tokens.len() >= request.max_sequence_length {
            request.tokens.truncate(request.max_sequence_length);
            reason.get_or_insert(FinishReason::MaxLength);
        }
        reason
    }

    /// Confirmed tokens the draft model has not processed yet. This is what
    /// the first expand step of a round carries for the request.
    fn catch_up_len(request: &Request) -> usize {
        let len = request.tokens.len();
        len - request.ssm_cache_len.min(len.saturating_sub(1))
    }

    fn select_ssm(&self) -> usize {
        let num_ssms = self.registry.num_ssms().max(1);
        match self.config.ssm_selection {
            SsmSelection::Fixed(id) if id < num_ssms => id,
            SsmSelection::Fixed(id) => {
                tracing::warn!(id, num_ssms, "configured draft model does not exist, using 0");
                0
            }
            SsmSelection::RoundRobin => (self.rounds % num_ssms as u64) as usize,
        }
    }

    /// Fold one expand step's candidates into the trees and build the next
    /// expand descriptor.
    pub fn prepare_next_batch_beam(
        &mut self,
        old: &ExpandBatch,
        result: &BeamResult,
    ) -> Result<ExpandBatch, SchedulerError> {
        let span = BatchSpan::new(Phase::Expand, "prepare_next_batch_beam");
        let _guard = span.enter();
        let next = self.store_beam_metadata(old, result).map(|()| {
            let mut next = ExpandBatch::new(self.config.max_requests, old.ssm_id);
            for (slot, _) in old.slots.occupied() {
                self.update_beam_metadata(&mut next, slot);
            }
            next
        });
        span.record_result(&next);
        if let Ok(batch) = &next {
            let (slots, tokens) = (batch.slots.num_occupied(), batch.num_tokens());
            Self::record_prepared(&span, Phase::Expand, slots, tokens);
        }
        next
    }

    /// Write each slot's candidates as a new layer of its beam tree.
    ///
    /// Slots that are no longer expanding are left alone. A slot whose
    /// candidates do not fit the tree aborts its request; the rest of the
    /// batch proceeds.
    pub fn store_beam_metadata(
        &mut self,
        old: &ExpandBatch,
        result: &BeamResult,
    ) -> Result<(), SchedulerError> {
        self.check_slots(&old.slots)?;
        for (slot, candidates) in result.candidates.iter().enumerate() {
            if !candidates.is_empty() && !old.slots.is_occupied(slot) {
                return Err(SchedulerError::UnexpectedOutput { slot });
            }
        }
        for (slot, entry) in old.slots.occupied() {
            let actual = self.trees.get(slot).map_or(0, |t| t.depth());
            if actual != entry.beam_depth {
                return Err(SchedulerError::StaleDescriptor {
                    slot,
                    described: entry.beam_depth,
                    actual,
                });
            }
        }

        let mut aborted = Vec::new();
        for (slot, entry) in old.slots.occupied() {
            let guid = entry.guid;
            let Some(request) = self.running.get_mut(&guid) else {
                continue;
            };
            if let ExpandInput::Prefix { token_start_offset, tokens, .. } = &entry.input {
                request.ssm_cache_len = token_start_offset + tokens.len();
            }

            let candidates = result.get(slot);
            if !entry.is_expanding() {
                if !candidates.is_empty() {
                    tracing::trace!(%guid, slot, "ignoring candidates after expansion ended");
                }
                continue;
            }
            if candidates.is_empty() {
                // Nothing proposed: the tree stays as it is for this round.
                request.max_depth = request.beam_depth;
                continue;
            }
            if candidates.len() > request.beam_width {
                aborted.push((
                    guid,
                    TreeError::LayerFull {
                        depth: request.beam_depth + 1,
                        count: candidates.len(),
                        capacity: request.beam_width,
                    },
                ));
                continue;
            }
            let Some(tree) = self.trees.get_mut(slot) else {
                continue;
            };
            match tree.push_layer(candidates) {
                Ok(depth) => {
                    request.beam_depth = depth;
                    request.beam_tree = tree.serialize();
                }
                Err(source) => aborted.push((guid, source)),
            }
        }
        for (guid, source) in aborted {
            self.abort(guid, SchedulerError::Tree { guid, source });
        }
        Ok(())
    }

    /// Describe the next expand step for `slot` in `batch`: the frontier
    /// layer while the tree may still grow, `Idle` afterwards.
    pub fn update_beam_metadata(&self, batch: &mut ExpandBatch, slot: usize) {
        let Some(guid) = self.slots.occupant(slot) else {
            return;
        };
        let (Some(request), Some(tree)) = (self.running.get(&guid), self.trees.get(slot)) else {
            return;
        };
        let input = if request.beam_depth < request.max_depth {
            let root_position = request.tokens.len().saturating_sub(1);
            ExpandInput::Frontier {
                position: root_position + request.beam_depth,
                nodes: tree
                    .frontier()
                    .iter()
                    .map(|(_, n)| FrontierToken {
                        token_id: n.token_id,
                        parent: n.parent,
                        log_prob: n.log_prob,
                    })
                    .collect(),
            }
        } else {
            ExpandInput::Idle
        };
        batch.slots.insert(
            slot,
            ExpandSlot {
                guid,
                beam_width: request.beam_width,
                beam_depth: request.beam_depth,
                max_depth: request.max_depth,
                input,
            },
        );
    }

    /// Flatten a running request's beam tree breadth-first, root first.
    pub fn traverse_beam_tree(
        &self,
        guid: RequestGuid,
    ) -> Result<Vec<TokenTreeNode>, SchedulerError> {
        let tree = self
            .slots
            .slot_of(guid)
            .and_then(|slot| self.trees.get(slot))
            .ok_or(SchedulerError::NotRunning(guid))?;
        Ok(tree.serialize())
    }

    /// Build the verify descriptor from the finished expand descriptor.
    ///
    /// Each slot carries its unprocessed prefix, the root and as much of its
    /// tree as the token budget allows. Trees are cut in breadth-first
    /// order, so every kept node keeps its parent.
    pub fn prepare_next_batch_verify(
        &mut self,
        old: &ExpandBatch,
    ) -> Result<VerifyBatch, SchedulerError> {
        let span = BatchSpan::new(Phase::Verify, "prepare_next_batch_verify");
        let _guard = span.enter();
        let next = self.build_verify(old);
        span.record_result(&next);
        if let Ok(batch) = &next {
            let (slots, tokens) = (batch.slots.num_occupied(), batch.num_tokens());
            Self::record_prepared(&span, Phase::Verify, slots, tokens);
        }
        next
    }

    fn build_verify(&mut self, old: &ExpandBatch) -> Result<VerifyBatch, SchedulerError> {
        self.check_slots(&old.slots)?;

        struct Plan {
            slot: usize,
            guid: RequestGuid,
            tree: Vec<TokenTreeNode>,
            prefix_start: usize,
            root_position: usize,
        }
        let mut plans = Vec::with_capacity(old.slots.num_occupied());
        let mut reserved = 0;
        for (slot, entry) in old.slots.occupied() {
            let guid = entry.guid;
            let tree = self.traverse_beam_tree(guid)?;
            let request = self.running.get(&guid).ok_or(SchedulerError::NotRunning(guid))?;
            let root_position = request.tokens.len().saturating_sub(1);
            let prefix_start = request.llm_cache_len.min(root_position);
            reserved += root_position - prefix_start + 1;
            plans.push(Plan { slot, guid, tree, prefix_start, root_position });
        }

        let wants: Vec<usize> = plans.iter().map(|p| p.tree.len().saturating_sub(1)).collect();
        let spare = self.config.max_tokens_per_batch.saturating_sub(reserved);
        let allot = share_budget(&wants, spare);

        let mut batch = VerifyBatch::new(self.config.max_requests);
        for (mut plan, extra) in plans.into_iter().zip(allot) {
            if plan.tree.len() > extra + 1 {
                tracing::debug!(
                    guid = %plan.guid,
                    nodes = plan.tree.len(),
                    kept = extra + 1,
                    "tree cut to fit the verify batch"
                );
                plan.tree.truncate(extra + 1);
            }
            let Some(request) = self.running.get_mut(&plan.guid) else {
                continue;
            };
            request.verify_tree_input = plan.tree.clone();
            request.verify_root_position = plan.root_position;
            request.verify_state = VerifyState::Pending;
            batch.slots.insert(
                plan.slot,
                VerifySlot {
                    guid: plan.guid,
                    token_start_offset: plan.prefix_start,
                    prefix: request.tokens[plan.prefix_start..plan.root_position].to_vec(),
                    root_position: plan.root_position,
                    tree: plan.tree,
                    committed: request.committed_tokens.clone(),
                },
            );
        }
        Ok(batch)
    }

    /// Reconcile a verified tree for `guid` and commit the longest accepted
    /// path. Returns the committed `(token, position)` pairs.
    ///
    /// `input_tree` is the tree as submitted, `output_tree` the verify
    /// model's prediction at every node in the same order. The root is
    /// always accepted, so an empty return means only the root matched.
    ///
    /// Valid once per verify pass, between `prepare_next_batch_verify` and
    /// the next `prepare_next_batch_init`, which then applies the bonus
    /// token and length limits without committing the pass again.
    pub fn traverse_verify_tree(
        &mut self,
        guid: RequestGuid,
        input_tree: &[TokenTreeNode],
        output_tree: &[TokenId],
    ) -> Result<Vec<(TokenId, usize)>, SchedulerError> {
        let request = self
            .running
            .get_mut(&guid)
            .ok_or(SchedulerError::NotRunning(guid))?;
        commit_tree(request, input_tree, output_tree).map(|commit| commit.tokens)
    }
}
