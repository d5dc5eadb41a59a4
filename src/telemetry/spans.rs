//! Span helpers for phase transitions.

use tracing::{info_span, Span};

use crate::batch::Phase;

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for the span wrapping one `prepare_next_batch*` call.
pub struct BatchSpan;

impl BatchSpan {
    /// Fields filled in later:
    /// - `status` / `error.message`: by `SpanExt::record_result`
    /// - `slots`, `tokens`: once the next descriptor is built
    pub fn new(phase: Phase, operation: &'static str) -> Span {
        info_span!(
            "prepare_batch",
            phase = %phase,
            operation = operation,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            slots = tracing::field::Empty,
            tokens = tracing::field::Empty,
        )
    }
}
