//! Metric recording through the `metrics` facade.
//!
//! No exporter is installed here; the embedding application picks one.
//! Without a recorder every call is a no-op.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::batch::Phase;
use crate::scheduler::FinishReason;

/// Register metric descriptions. Safe to call more than once.
pub fn init_metrics() {
    describe_counter!("specflow_batches_total", "Batch descriptors produced, by phase");
    describe_histogram!("specflow_batch_tokens", "Tokens carried by one batch descriptor");
    describe_histogram!("specflow_batch_slots", "Occupied slots in one batch descriptor");
    describe_counter!("specflow_requests_registered_total", "Requests accepted at registration");
    describe_counter!("specflow_requests_finished_total", "Requests retired, by reason");
    describe_histogram!("specflow_request_duration_seconds", "Wall-clock run time per request");
    describe_histogram!("specflow_request_steps", "Decoding steps per retired request");
    describe_gauge!("specflow_queue_depth", "Requests waiting for a slot");
    describe_histogram!("specflow_verify_tree_size", "Nodes submitted per verified tree");
    describe_histogram!("specflow_verify_accepted", "Tokens accepted per verified tree");
}

/// Record one descriptor handed to the compute engine.
pub fn record_batch(phase: Phase, slots: usize, tokens: usize) {
    let phase = phase.as_str();
    counter!("specflow_batches_total", "phase" => phase).increment(1);
    histogram!("specflow_batch_slots", "phase" => phase).record(slots as f64);
    histogram!("specflow_batch_tokens", "phase" => phase).record(tokens as f64);
}

/// Record the outcome of reconciling one tree.
pub fn record_verification(tree_size: usize, accepted: usize) {
    histogram!("specflow_verify_tree_size").record(tree_size as f64);
    histogram!("specflow_verify_accepted").record(accepted as f64);
}

pub fn record_registered(queue_depth: usize) {
    counter!("specflow_requests_registered_total").increment(1);
    record_queue_depth(queue_depth);
}

pub fn record_retired(reason: FinishReason, steps: u32, elapsed: Duration) {
    let reason = match reason {
        FinishReason::EndOfSequence => "eos",
        FinishReason::MaxLength => "max_length",
        FinishReason::Aborted => "aborted",
    };
    counter!("specflow_requests_finished_total", "reason" => reason).increment(1);
    histogram!("specflow_request_duration_seconds").record(elapsed.as_secs_f64());
    histogram!("specflow_request_steps").record(f64::from(steps));
}

pub fn record_queue_depth(depth: usize) {
    gauge!("specflow_queue_depth").set(depth as f64);
}
