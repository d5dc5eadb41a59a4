//! Per-request generation state.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::{CommittedToken, RequestGuid};
use crate::tree::{TokenId, TokenTreeNode};

/// Response channel type for delivering results back to callers.
pub type ResponseTx = tokio::sync::oneshot::Sender<Result<GenerationOutput, String>>;
/// Receiver half for awaiting generation results.
pub type ResponseRx = tokio::sync::oneshot::Receiver<Result<GenerationOutput, String>>;

/// Why a request left the running set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The terminal marker was produced.
    EndOfSequence,
    /// `max_sequence_length` was reached.
    MaxLength,
    /// A tree-shape violation stopped processing.
    Aborted,
}

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Running { slot: usize },
    Finished(FinishReason),
}

/// Timing and step count for a retired request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileInfo {
    /// Compute-engine passes that advanced this request (decode steps or
    /// verify passes).
    pub decoding_steps: u32,
    pub start_time: DateTime<Utc>,
    pub finish_time: DateTime<Utc>,
    pub run_time: Duration,
}

/// Final result handed back to the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub guid: RequestGuid,
    pub prompt_len: usize,
    /// Prompt followed by every committed token.
    pub tokens: Vec<TokenId>,
    /// Decoded completion when a tokenizer is configured.
    pub text: Option<String>,
    pub finish_reason: FinishReason,
    pub error: Option<String>,
    pub profile: ProfileInfo,
}

impl GenerationOutput {
    pub fn generated(&self) -> &[TokenId] {
        &self.tokens[self.prompt_len.min(self.tokens.len())..]
    }
}

/// Where a request stands with respect to its last verify pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VerifyState {
    /// No verify descriptor is outstanding.
    Idle,
    /// A verify descriptor was built and its result not yet reconciled.
    Pending,
    /// Reconciled through `traverse_verify_tree`; the round still has to
    /// apply the bonus token and the length limits.
    Reconciled { bonus: TokenId },
}

/// One logical generation session.
#[derive(Debug)]
pub struct Request {
    pub guid: RequestGuid,
    pub max_sequence_length: usize,
    pub initial_len: usize,
    pub beam_width: usize,
    pub beam_depth: usize,
    /// Confirmed tokens: the prompt followed by committed output.
    pub tokens: Vec<TokenId>,
    /// Breadth-first copy of the candidate tree grown this round.
    pub beam_tree: Vec<TokenTreeNode>,
    /// Tree submitted to the last verify pass, in submission order.
    pub verify_tree_input: Vec<TokenTreeNode>,
    /// Nodes accepted by the last verify pass.
    pub committed_tokens: Vec<CommittedToken>,

    /// Depth at which this round's expansion stops.
    pub(crate) max_depth: usize,
    /// Sequence position of the root of `verify_tree_input`.
    pub(crate) verify_root_position: usize,
    pub(crate) verify_state: VerifyState,
    /// Confirmed tokens the verify model holds in its cache.
    pub(crate) llm_cache_len: usize,
    /// Confirmed tokens the draft model holds in its cache.
    pub(crate) ssm_cache_len: usize,
    pub(crate) decoding_steps: u32,
    pub(crate) start_time: DateTime<Utc>,
    pub(crate) started: Instant,
    pub(crate) response_tx: Option<ResponseTx>,
}

impl Request {
    pub(crate) fn new(
        guid: RequestGuid,
        prompt: Vec<TokenId>,
        max_sequence_length: usize,
        response_tx: Option<ResponseTx>,
    ) -> Self {
        Self {
            guid,
            max_sequence_length,
            initial_len: prompt.len(),
            beam_width: 0,
            beam_depth: 0,
            tokens: prompt,
            beam_tree: Vec::new(),
            verify_tree_input: Vec::new(),
            committed_tokens: Vec::new(),
            max_depth: 0,
            verify_root_position: 0,
            verify_state: VerifyState::Idle,
            llm_cache_len: 0,
            ssm_cache_len: 0,
            decoding_steps: 0,
            start_time: Utc::now(),
            started: Instant::now(),
            response_tx,
        }
    }

    /// Last confirmed token. Requests are never registered with an empty prompt.
    pub fn last_token(&self) -> TokenId {
        self.tokens.last().copied().unwrap_or_default()
    }

    /// Tokens still allowed before `max_sequence_length`.
    pub fn remaining(&self) -> usize {
        self.max_sequence_length.saturating_sub(self.tokens.len())
    }

    pub fn is_at_max_length(&self) -> bool {
        self.tokens.len() >= self.max_sequence_length
    }

    /// Number of generated (non-prompt) tokens.
    pub fn generated_len(&self) -> usize {
        self.tokens.len().saturating_sub(self.initial_len)
    }

    pub(crate) fn profile(&self) -> ProfileInfo {
        ProfileInfo {
            decoding_steps: self.decoding_steps,
            start_time: self.start_time,
            finish_time: Utc::now(),
            run_time: self.started.elapsed(),
        }
    }
}
