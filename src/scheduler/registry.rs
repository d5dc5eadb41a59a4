//! Request registry shared between ingress and the control loop.
//!
//! Guid allocation and the pending queue sit behind one `parking_lot` mutex
//! so registration can run from any thread while a phase transition is in
//! progress. Status and profiling records live in `DashMap`s so they can be
//! read concurrently; only the control loop writes them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::error::RegistrationError;
use super::request::{ProfileInfo, Request, RequestStatus, ResponseRx, ResponseTx};
use crate::batch::RequestGuid;
use crate::engine::Tokenizer;
use crate::telemetry;
use crate::tree::TokenId;

/// First guid handed out by a fresh registry.
pub const FIRST_GUID: u64 = 1_000_000;

struct PendingState {
    queue: VecDeque<Request>,
    next_guid: u64,
}

/// Thread-safe registration surface.
pub struct RequestRegistry {
    pending: Mutex<PendingState>,
    statuses: DashMap<RequestGuid, RequestStatus>,
    profiles: DashMap<RequestGuid, ProfileInfo>,
    num_processed: AtomicUsize,
    total_run_time_ns: AtomicU64,
    num_ssms: AtomicUsize,
    /// Largest prompt a single batch can carry.
    max_prompt_tokens: usize,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    /// Wakes an idle control loop when a request arrives.
    notify: Notify,
}

impl std::fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("pending", &self.pending_len())
            .field("processed", &self.num_processed_requests())
            .field("num_ssms", &self.num_ssms())
            .finish()
    }
}

impl RequestRegistry {
    pub fn new(max_prompt_tokens: usize, tokenizer: Option<Arc<dyn Tokenizer>>) -> Self {
        Self {
            pending: Mutex::new(PendingState { queue: VecDeque::new(), next_guid: FIRST_GUID }),
            statuses: DashMap::new(),
            profiles: DashMap::new(),
            num_processed: AtomicUsize::new(0),
            total_run_time_ns: AtomicU64::new(0),
            num_ssms: AtomicUsize::new(1),
            max_prompt_tokens,
            tokenizer,
            notify: Notify::new(),
        }
    }

    /// Register a tokenized prompt. Never blocks on the control loop.
    pub fn register(
        &self,
        prompt: Vec<TokenId>,
        max_sequence_length: usize,
    ) -> Result<RequestGuid, RegistrationError> {
        self.register_inner(prompt, max_sequence_length, None)
    }

    /// Register a text prompt through the configured tokenizer.
    pub fn register_text(
        &self,
        prompt: &str,
        max_sequence_length: usize,
    ) -> Result<RequestGuid, RegistrationError> {
        let tokens = self.encode(prompt)?;
        self.register_inner(tokens, max_sequence_length, None)
    }

    /// Register with a response channel. Returns (guid, receiver).
    pub fn register_with_response(
        &self,
        prompt: Vec<TokenId>,
        max_sequence_length: usize,
    ) -> Result<(RequestGuid, ResponseRx), RegistrationError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let guid = self.register_inner(prompt, max_sequence_length, Some(tx))?;
        Ok((guid, rx))
    }

    pub fn register_text_with_response(
        &self,
        prompt: &str,
        max_sequence_length: usize,
    ) -> Result<(RequestGuid, ResponseRx), RegistrationError> {
        let tokens = self.encode(prompt)?;
        self.register_with_response(tokens, max_sequence_length)
    }

    fn encode(&self, prompt: &str) -> Result<Vec<TokenId>, RegistrationError> {
        let tokenizer = self.tokenizer.as_ref().ok_or(RegistrationError::NoTokenizer)?;
        tokenizer
            .encode(prompt)
            .map_err(|e| RegistrationError::Tokenizer(e.to_string()))
    }

    fn register_inner(
        &self,
        prompt: Vec<TokenId>,
        max_sequence_length: usize,
        response_tx: Option<ResponseTx>,
    ) -> Result<RequestGuid, RegistrationError> {
        let prompt_len = prompt.len();
        if prompt_len == 0 {
            return Err(RegistrationError::EmptyPrompt);
        }
        if max_sequence_length <= prompt_len {
            return Err(RegistrationError::PromptTooLong { prompt_len, max_sequence_length });
        }
        if prompt_len > self.max_prompt_tokens {
            return Err(RegistrationError::ExceedsBatchCapacity {
                prompt_len,
                capacity: self.max_prompt_tokens,
            });
        }

        let mut pending = self.pending.lock();
        let guid = RequestGuid(pending.next_guid);
        pending.next_guid += 1;
        pending
            .queue
            .push_back(Request::new(guid, prompt, max_sequence_length, response_tx));
        self.statuses.insert(guid, RequestStatus::Pending);
        let depth = pending.queue.len();
        drop(pending);

        tracing::debug!(%guid, prompt_len, max_sequence_length, "request registered");
        telemetry::record_registered(depth);
        self.notify.notify_one();
        Ok(guid)
    }

    /// Pop the oldest pending request if `admit` accepts it.
    ///
    /// Admission is strictly FIFO: a head request that does not fit blocks
    /// everything behind it.
    pub(crate) fn pop_pending_if(&self, admit: impl FnOnce(&Request) -> bool) -> Option<Request> {
        let mut pending = self.pending.lock();
        if !admit(pending.queue.front()?) {
            return None;
        }
        let request = pending.queue.pop_front();
        telemetry::record_queue_depth(pending.queue.len());
        request
    }

    pub(crate) fn set_status(&self, guid: RequestGuid, status: RequestStatus) {
        self.statuses.insert(guid, status);
    }

    pub(crate) fn record_finished(
        &self,
        guid: RequestGuid,
        status: RequestStatus,
        profile: ProfileInfo,
    ) {
        let nanos = u64::try_from(profile.run_time.as_nanos()).unwrap_or(u64::MAX);
        self.total_run_time_ns.fetch_add(nanos, Ordering::Relaxed);
        self.num_processed.fetch_add(1, Ordering::Relaxed);
        self.profiles.insert(guid, profile);
        self.statuses.insert(guid, status);
    }

    pub(crate) fn tokenizer(&self) -> Option<&Arc<dyn Tokenizer>> {
        self.tokenizer.as_ref()
    }

    /// Wait until a registration arrives. Returns immediately if one arrived
    /// since the last wait.
    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }

    /// Wake a waiting control loop without registering anything.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().queue.len()
    }

    pub fn status(&self, guid: RequestGuid) -> Option<RequestStatus> {
        self.statuses.get(&guid).map(|s| *s)
    }

    pub fn profile(&self, guid: RequestGuid) -> Option<ProfileInfo> {
        self.profiles.get(&guid).map(|p| p.clone())
    }

    /// Requests retired so far, for whatever reason.
    pub fn num_processed_requests(&self) -> usize {
        self.num_processed.load(Ordering::Relaxed)
    }

    /// Summed wall-clock run time of every retired request.
    pub fn total_request_run_time(&self) -> Duration {
        Duration::from_nanos(self.total_run_time_ns.load(Ordering::Relaxed))
    }

    /// Register another draft model. Returns its id.
    pub fn add_ssm(&self) -> usize {
        self.num_ssms.fetch_add(1, Ordering::SeqCst)
    }

    /// Number of configured draft models (at least one).
    pub fn num_ssms(&self) -> usize {
        self.num_ssms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RequestRegistry {
        RequestRegistry::new(16, None)
    }

    #[test]
    fn guids_start_at_first_guid_and_increase() {
        let reg = registry();
        let a = reg.register(vec![1], 4).unwrap();
        let b = reg.register(vec![2], 4).unwrap();
        assert_eq!(a, RequestGuid(FIRST_GUID));
        assert!(b > a);
        assert_eq!(reg.pending_len(), 2);
        assert_eq!(reg.status(a), Some(RequestStatus::Pending));
    }

    #[test]
    fn rejects_max_length_not_above_prompt() {
        let reg = registry();
        let err = reg.register(vec![1, 2, 3], 3).unwrap_err();
        assert_eq!(
            err,
            RegistrationError::PromptTooLong { prompt_len: 3, max_sequence_length: 3 }
        );
        assert_eq!(reg.pending_len(), 0);
    }

    #[test]
    fn rejects_prompt_beyond_batch_capacity() {
        let reg = RequestRegistry::new(2, None);
        assert!(matches!(
            reg.register(vec![1, 2, 3], 10),
            Err(RegistrationError::ExceedsBatchCapacity { .. })
        ));
    }

    #[test]
    fn text_without_tokenizer_fails() {
        let reg = registry();
        assert_eq!(reg.register_text("hi", 8), Err(RegistrationError::NoTokenizer));
    }

    #[test]
    fn pop_respects_predicate_and_fifo() {
        let reg = registry();
        let first = reg.register(vec![1, 1, 1], 8).unwrap();
        reg.register(vec![2], 8).unwrap();
        assert!(reg.pop_pending_if(|r| r.initial_len <= 2).is_none());
        let popped = reg.pop_pending_if(|_| true).unwrap();
        assert_eq!(popped.guid, first);
    }

    #[test]
    fn wait_for_work_pends_until_registration() {
        let reg = registry();
        let mut wait = tokio_test::task::spawn(reg.wait_for_work());
        tokio_test::assert_pending!(wait.poll());
        reg.register(vec![1], 4).unwrap();
        assert!(wait.is_woken());
        tokio_test::assert_ready!(wait.poll());
    }

    #[test]
    fn ssm_ids_are_sequential() {
        let reg = registry();
        assert_eq!(reg.num_ssms(), 1);
        assert_eq!(reg.add_ssm(), 1);
        assert_eq!(reg.add_ssm(), 2);
        assert_eq!(reg.num_ssms(), 3);
    }
}
