//! Request scheduling for tree-based speculative inference.
//!
//! Requests are registered into a shared [`RequestRegistry`], admitted into
//! fixed batch slots by the [`RequestManager`], and advanced either one
//! token per decode step or one speculative round at a time.

mod config;
mod error;
mod manager;
mod registry;
mod request;
mod slots;
mod speculative;

pub use config::{ConfigError, SchedulerConfig, SsmSelection};
pub use error::{RegistrationError, SchedulerError};
pub use manager::RequestManager;
pub use registry::{RequestRegistry, FIRST_GUID};
pub use request::{
    FinishReason, GenerationOutput, ProfileInfo, Request, RequestStatus, ResponseRx, ResponseTx,
};
pub use slots::SlotTable;
