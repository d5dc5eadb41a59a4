//! Structured logging, phase spans and metrics.
//!
//! Metrics go through the `metrics` facade; nothing is exported unless the
//! host installs a recorder.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    init_metrics, record_batch, record_queue_depth, record_registered, record_retired,
    record_verification,
};
pub use spans::{BatchSpan, SpanExt};
