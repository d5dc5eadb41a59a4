//! Incremental decoding through `RequestManager::prepare_next_batch`.

use std::sync::Arc;

use specflow_core::batch::{DecodeBatch, DecodeResult, DecodeSlot};
use specflow_core::engine::ByteTokenizer;
use specflow_core::scheduler::{
    FinishReason, RequestManager, RequestStatus, SchedulerConfig, SchedulerError,
};
use specflow_core::tree::TokenId;
use specflow_core::RequestGuid;

fn manager(max_requests: usize, max_tokens: usize) -> RequestManager {
    RequestManager::new(SchedulerConfig {
        max_requests,
        max_tokens_per_batch: max_tokens,
        ..Default::default()
    })
    .unwrap()
}

/// Answer every occupied slot with `last + 1`.
fn count_up(batch: &DecodeBatch) -> DecodeResult {
    let mut result = DecodeResult::new(batch.slots.capacity());
    for (slot, entry) in batch.slots.occupied() {
        result.set(slot, entry.tokens.last().copied().unwrap_or_default() + 1);
    }
    result
}

// =============================================================================
// Single request lifecycle
// =============================================================================

#[test]
fn request_runs_to_max_length_then_slot_is_reused() {
    let mut m = manager(1, 16);
    let first = m.register(vec![5, 6, 7], 10).unwrap();
    let second = m.register(vec![1], 3).unwrap();

    let mut batch = m
        .prepare_next_batch(&m.empty_decode_batch(), &DecodeResult::new(1))
        .unwrap();
    assert_eq!(batch.slots.get(0).unwrap().guid, first);
    assert_eq!(m.registry().status(second), Some(RequestStatus::Pending));

    let mut steps = 0;
    while m.request(first).is_some() {
        let before = m.request(first).unwrap().tokens.len();
        let result = count_up(&batch);
        batch = m.prepare_next_batch(&batch, &result).unwrap();
        steps += 1;
        if let Some(req) = m.request(first) {
            assert_eq!(req.tokens.len(), before + 1);
        }
    }
    assert_eq!(steps, 7);

    let done = m.take_completed();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].guid, first);
    assert_eq!(done[0].tokens, (5..=14).collect::<Vec<TokenId>>());
    assert_eq!(done[0].finish_reason, FinishReason::MaxLength);
    assert_eq!(done[0].generated(), &[8, 9, 10, 11, 12, 13, 14]);
    assert_eq!(
        m.registry().status(first),
        Some(RequestStatus::Finished(FinishReason::MaxLength))
    );
    assert_eq!(m.registry().profile(first).unwrap().decoding_steps, 7);

    // The freed slot is refilled in the same transition.
    let slot = batch.slots.get(0).unwrap();
    assert_eq!(slot.guid, second);
    assert_eq!(slot.token_start_offset, 0);
    assert_eq!(slot.tokens, vec![1]);
}

#[test]
fn steps_after_the_prompt_carry_one_token() {
    let mut m = manager(2, 16);
    let guid = m.register(vec![2, 3, 4], 8).unwrap();
    let batch = m
        .prepare_next_batch(&m.empty_decode_batch(), &DecodeResult::new(2))
        .unwrap();
    let batch = m.prepare_next_batch(&batch, &count_up(&batch)).unwrap();
    let slot = batch.slots.get(0).unwrap();
    assert_eq!(slot.guid, guid);
    assert_eq!(slot.token_start_offset, 3);
    assert_eq!(slot.tokens, vec![5]);
    assert!(!slot.is_prompt_step());
}

#[test]
fn end_marker_retires_request() {
    let mut m = RequestManager::new(SchedulerConfig {
        max_requests: 2,
        max_tokens_per_batch: 16,
        eos_token: Some(0),
        ..Default::default()
    })
    .unwrap();
    let guid = m.register(vec![7], 20).unwrap();
    let batch = m
        .prepare_next_batch(&m.empty_decode_batch(), &DecodeResult::new(2))
        .unwrap();
    let batch = m
        .prepare_next_batch(&batch, &DecodeResult::new(2).with_token(0, 0))
        .unwrap();
    assert!(batch.slots.is_empty());
    let done = m.take_completed();
    assert_eq!(done[0].guid, guid);
    assert_eq!(done[0].tokens, vec![7, 0]);
    assert_eq!(done[0].finish_reason, FinishReason::EndOfSequence);
}

// =============================================================================
// Admission
// =============================================================================

#[test]
fn admission_is_fifo_and_head_blocks() {
    let mut m = manager(3, 6);
    let a = m.register(vec![1, 1, 1], 10).unwrap();
    let b = m.register(vec![2, 2, 2, 2], 10).unwrap();
    let c = m.register(vec![3, 3, 3], 10).unwrap();

    let batch = m
        .prepare_next_batch(&m.empty_decode_batch(), &DecodeResult::new(3))
        .unwrap();
    // `b` does not fit beside `a`, and `c` may not overtake it.
    assert_eq!(batch.slots.guids(), vec![a]);
    assert_eq!(m.registry().pending_len(), 2);
    assert!(batch.num_tokens() <= 6);

    // With `a` down to one token per step, `b` now fits; `c` still does not.
    let batch = m.prepare_next_batch(&batch, &count_up(&batch)).unwrap();
    assert_eq!(batch.slots.guids(), vec![a, b]);
    assert_eq!(m.registry().status(c), Some(RequestStatus::Pending));
    assert!(batch.num_tokens() <= 6);
}

#[test]
fn batches_never_exceed_token_capacity() {
    let mut m = manager(4, 8);
    for i in 0..10u32 {
        m.register(vec![i; 1 + (i as usize % 4)], 12).unwrap();
    }
    let mut batch = m
        .prepare_next_batch(&m.empty_decode_batch(), &DecodeResult::new(4))
        .unwrap();
    let mut guard = 0;
    while !m.is_idle() {
        assert!(batch.num_tokens() <= 8);
        assert!(batch.slots.is_injective());
        batch = m.prepare_next_batch(&batch, &count_up(&batch)).unwrap();
        guard += 1;
        assert!(guard < 500, "scheduler stopped making progress");
    }
    assert_eq!(m.num_processed_requests(), 10);
}

// =============================================================================
// Desynchronised descriptors
// =============================================================================

#[test]
fn unknown_request_in_descriptor_is_rejected() {
    let mut m = manager(2, 16);
    let mut bogus = DecodeBatch::new(2);
    bogus.slots.insert(
        0,
        DecodeSlot {
            guid: RequestGuid(42),
            token_start_offset: 0,
            tokens: vec![1],
            max_sequence_length: 4,
        },
    );
    let err = m
        .prepare_next_batch(&bogus, &DecodeResult::new(2).with_token(0, 2))
        .unwrap_err();
    assert_eq!(err, SchedulerError::UnknownRequest { slot: 0, guid: RequestGuid(42) });
}

#[test]
fn swapped_slots_are_rejected_without_mutation() {
    let mut m = manager(2, 16);
    let a = m.register(vec![1], 10).unwrap();
    let b = m.register(vec![2], 10).unwrap();
    let batch = m
        .prepare_next_batch(&m.empty_decode_batch(), &DecodeResult::new(2))
        .unwrap();

    let mut swapped = DecodeBatch::new(2);
    let mut first = batch.slots.get(0).unwrap().clone();
    let mut second = batch.slots.get(1).unwrap().clone();
    std::mem::swap(&mut first.guid, &mut second.guid);
    swapped.slots.insert(0, first);
    swapped.slots.insert(1, second);

    let err = m.prepare_next_batch(&swapped, &count_up(&swapped)).unwrap_err();
    assert!(matches!(err, SchedulerError::SlotMismatch { slot: 0, .. }));
    assert_eq!(m.request(a).unwrap().tokens, vec![1]);
    assert_eq!(m.request(b).unwrap().tokens, vec![2]);
}

// =============================================================================
// Text prompts and response channels
// =============================================================================

#[tokio::test]
async fn text_request_delivers_decoded_output() {
    let config = SchedulerConfig { max_requests: 1, ..Default::default() };
    let mut m = RequestManager::with_tokenizer(config, Arc::new(ByteTokenizer)).unwrap();
    let (guid, rx) = m.registry().register_text_with_response("ab", 4).unwrap();
    assert_eq!(m.registry().pending_len(), 1);

    let mut batch = m
        .prepare_next_batch(&m.empty_decode_batch(), &DecodeResult::new(1))
        .unwrap();
    assert_eq!(batch.slots.get(0).unwrap().tokens, vec![97, 98]);
    while m.request(guid).is_some() {
        batch = m.prepare_next_batch(&batch, &count_up(&batch)).unwrap();
    }

    let output = rx.await.unwrap().unwrap();
    assert_eq!(output.guid, guid);
    assert_eq!(output.generated(), &[99, 100]);
    assert_eq!(output.text.as_deref(), Some("cd"));
}
