//! Scheduler error types.
//!
//! Registration errors are returned to the caller that submitted the
//! request. Scheduler errors mean the compute engine's view of a batch no
//! longer matches the manager's; they are reported, never retried.

use thiserror::Error;

use crate::batch::RequestGuid;
use crate::tree::{TokenId, TreeError};

/// Rejections at registration time. A rejected request never enters the
/// pending queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("max_sequence_length {max_sequence_length} must exceed prompt length {prompt_len}")]
    PromptTooLong {
        prompt_len: usize,
        max_sequence_length: usize,
    },

    #[error("prompt of {prompt_len} tokens exceeds batch capacity of {capacity} tokens")]
    ExceedsBatchCapacity { prompt_len: usize, capacity: usize },

    #[error("text prompt given but no tokenizer is configured")]
    NoTokenizer,

    #[error("tokenizer failed: {0}")]
    Tokenizer(String),
}

/// Desynchronisation between a descriptor/result pair and scheduler state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("batch has {actual} slots, scheduler has {expected}")]
    SlotCountMismatch { expected: usize, actual: usize },

    #[error("slot {slot} names request {guid}, which is not running")]
    UnknownRequest { slot: usize, guid: RequestGuid },

    #[error("request {0} is not running")]
    NotRunning(RequestGuid),

    #[error("slot {slot} names request {actual}, but it is assigned to {expected:?}")]
    SlotMismatch {
        slot: usize,
        expected: Option<RequestGuid>,
        actual: RequestGuid,
    },

    #[error("result carries output for unoccupied slot {slot}")]
    UnexpectedOutput { slot: usize },

    #[error("result has no output for occupied slot {slot}")]
    MissingOutput { slot: usize },

    #[error("slot {slot} describes depth {described}, tree is at depth {actual}")]
    StaleDescriptor {
        slot: usize,
        described: usize,
        actual: usize,
    },

    #[error("request {0} has no verify pass awaiting reconciliation")]
    NoVerifyPending(RequestGuid),

    #[error("request {guid}: tree root {actual} is not confirmed token {expected} at {position}")]
    VerifyRootMismatch {
        guid: RequestGuid,
        position: usize,
        expected: TokenId,
        actual: TokenId,
    },

    #[error("request {guid}: {source}")]
    Tree {
        guid: RequestGuid,
        #[source]
        source: TreeError,
    },
}

impl SchedulerError {
    /// True for violations confined to a single request.
    pub fn is_request_local(&self) -> bool {
        matches!(self, Self::Tree { .. })
    }
}
