//! Registration surface: guid allocation, validation and wake-ups.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use specflow_core::scheduler::{RegistrationError, RequestRegistry, RequestStatus, FIRST_GUID};
use specflow_core::RequestGuid;

// =============================================================================
// Guid allocation
// =============================================================================

#[test]
fn concurrent_registration_yields_unique_guids() {
    let registry = Arc::new(RequestRegistry::new(64, None));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                (0..100)
                    .map(|i| registry.register(vec![t, i], 16).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        let guids = handle.join().unwrap();
        // Each thread observes its own guids strictly increasing.
        assert!(guids.windows(2).all(|w| w[0] < w[1]));
        for guid in guids {
            assert!(all.insert(guid), "guid {guid} handed out twice");
        }
    }
    assert_eq!(all.len(), 800);
    assert_eq!(registry.pending_len(), 800);
    let expected: HashSet<_> = (FIRST_GUID..FIRST_GUID + 800).map(RequestGuid).collect();
    assert_eq!(all, expected);
}

#[test]
fn rejected_registration_does_not_consume_a_guid() {
    let registry = RequestRegistry::new(8, None);
    assert_eq!(registry.register(Vec::new(), 4), Err(RegistrationError::EmptyPrompt));
    let guid = registry.register(vec![1], 4).unwrap();
    assert_eq!(guid, RequestGuid(FIRST_GUID));
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn validation_errors_leave_queue_untouched() {
    let registry = RequestRegistry::new(4, None);
    assert!(registry.register(Vec::new(), 4).is_err());
    assert!(registry.register(vec![1, 2], 2).is_err());
    assert!(registry.register(vec![1, 2, 3, 4, 5], 10).is_err());
    assert_eq!(registry.pending_len(), 0);
}

#[test]
fn empty_prompt_reported_before_length() {
    let registry = RequestRegistry::new(4, None);
    assert_eq!(registry.register(Vec::new(), 0), Err(RegistrationError::EmptyPrompt));
}

#[test]
fn prompt_too_long_reported_before_capacity() {
    let registry = RequestRegistry::new(2, None);
    assert_eq!(
        registry.register(vec![1, 2, 3], 3),
        Err(RegistrationError::PromptTooLong { prompt_len: 3, max_sequence_length: 3 })
    );
}

#[test]
fn error_messages_name_the_limits() {
    let err = RegistrationError::ExceedsBatchCapacity { prompt_len: 70, capacity: 64 };
    let msg = err.to_string();
    assert!(msg.contains("70"));
    assert!(msg.contains("64"));
}

// =============================================================================
// Status and response channel
// =============================================================================

#[test]
fn new_registration_is_pending() {
    let registry = RequestRegistry::new(8, None);
    let guid = registry.register(vec![3, 4], 8).unwrap();
    assert_eq!(registry.status(guid), Some(RequestStatus::Pending));
    assert_eq!(registry.status(RequestGuid(1)), None);
    assert!(registry.profile(guid).is_none());
}

#[test]
fn response_receiver_sees_dropped_request() {
    let registry = RequestRegistry::new(8, None);
    let (_guid, mut rx) = registry.register_with_response(vec![1], 4).unwrap();
    // Nothing has been produced yet.
    assert!(rx.try_recv().is_err());
}

// =============================================================================
// Wake-ups
// =============================================================================

#[tokio::test]
async fn registration_wakes_waiting_loop() {
    let registry = Arc::new(RequestRegistry::new(8, None));
    let waiter = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.wait_for_work().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    registry.register(vec![1], 4).unwrap();
    tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter not woken")
        .unwrap();
}

#[tokio::test]
async fn registration_before_wait_is_not_lost() {
    let registry = RequestRegistry::new(8, None);
    registry.register(vec![1], 4).unwrap();
    tokio::time::timeout(Duration::from_secs(5), registry.wait_for_work())
        .await
        .expect("stored permit was lost");
}

#[tokio::test]
async fn wake_releases_waiter_without_registration() {
    let registry = RequestRegistry::new(8, None);
    registry.wake();
    tokio::time::timeout(Duration::from_secs(5), registry.wait_for_work())
        .await
        .expect("wake did not release the waiter");
    assert_eq!(registry.pending_len(), 0);
}
