//! Telemetry module tests.

use std::path::PathBuf;
use std::time::Duration;

use specflow_core::scheduler::FinishReason;
use specflow_core::telemetry::{
    init_metrics, record_batch, record_queue_depth, record_registered, record_retired,
    record_verification, BatchSpan, LogConfig, LogError, LogFormat, SpanExt,
};
use specflow_core::Phase;
use tracing::Span;

// =============================================================================
// LogConfig Tests
// =============================================================================

#[test]
fn log_config_default_is_json() {
    let config = LogConfig::default();
    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, "info");
    assert!(config.output_path.is_none());
}

#[test]
fn log_config_with_output_path() {
    let config = LogConfig {
        format: LogFormat::Json,
        level: "specflow_core=trace".to_string(),
        output_path: Some(PathBuf::from("/tmp/specflow.log")),
    };
    assert_eq!(config.output_path, Some(PathBuf::from("/tmp/specflow.log")));
}

#[test]
fn log_format_parses_case_insensitively() {
    assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
    assert_eq!(" Pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    assert!(matches!("xml".parse::<LogFormat>(), Err(LogError::UnknownFormat(f)) if f == "xml"));
}

// =============================================================================
// LogError Tests
// =============================================================================

#[test]
fn log_error_invalid_filter_display() {
    let error = LogError::InvalidFilter("bad filter".to_string());
    assert!(error.to_string().contains("Invalid log filter"));
    assert!(error.to_string().contains("bad filter"));
}

#[test]
fn log_error_file_open_display() {
    let error = LogError::FileOpen("permission denied".to_string());
    assert!(error.to_string().contains("Failed to open log file"));
}

#[test]
fn log_error_already_initialized_display() {
    assert!(LogError::AlreadyInitialized.to_string().contains("already initialized"));
}

// =============================================================================
// Span Tests
// =============================================================================

#[test]
fn span_ext_record_result_ok_and_err() {
    let span = Span::none();
    span.record_result(&Ok::<u32, &str>(7));
    span.record_result(&Err::<u32, &str>("desync"));
}

#[test]
fn batch_span_for_every_phase() {
    for (phase, op) in [
        (Phase::Decode, "prepare_next_batch"),
        (Phase::Expand, "prepare_next_batch_beam"),
        (Phase::Verify, "prepare_next_batch_verify"),
    ] {
        // Without a subscriber, spans are disabled; creation must not panic.
        let span = BatchSpan::new(phase, op);
        let _guard = span.enter();
        span.record("slots", 2);
        span.record("tokens", 9);
    }
}

// =============================================================================
// Metrics Tests
// =============================================================================

#[test]
fn metrics_init_is_repeatable() {
    init_metrics();
    init_metrics();
}

#[test]
fn record_helpers_without_recorder() {
    record_batch(Phase::Verify, 3, 40);
    record_verification(17, 5);
    record_registered(4);
    record_queue_depth(0);
    for reason in [FinishReason::EndOfSequence, FinishReason::MaxLength, FinishReason::Aborted] {
        record_retired(reason, 12, Duration::from_millis(3));
    }
}

#[test]
fn metrics_record_extreme_values() {
    record_batch(Phase::Decode, 0, 0);
    record_queue_depth(usize::MAX / 2);
    record_retired(FinishReason::MaxLength, u32::MAX, Duration::ZERO);
}

// =============================================================================
// Integration Tests
// =============================================================================

#[test]
fn span_with_metrics_integration() {
    let span = BatchSpan::new(Phase::Expand, "prepare_next_batch_init");
    let _guard = span.enter();
    record_queue_depth(1);
    let result: Result<usize, &str> = Ok(3);
    span.record_result(&result);
    record_batch(Phase::Expand, 3, 12);
    record_queue_depth(0);
}
