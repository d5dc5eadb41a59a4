//! SpecFlow core
//!
//! Request orchestration for tree-based speculative inference. The crate
//! decides which requests run in which batch slot and what each slot
//! carries; model execution lives behind the traits in [`engine`].
//!
//! # Phases
//!
//! - **Decode**: one token per request per step, whole prompt on the first.
//! - **Expand**: a draft model grows a bounded candidate tree per request,
//!   one layer per step.
//! - **Verify**: the verify model scores every tree in one pass; the longest
//!   accepted path is committed and the next round starts from its end.
//!
//! # Threading
//!
//! Registration goes through a shared [`scheduler::RequestRegistry`] and is
//! safe from any thread. Phase transitions run on one control loop that owns
//! the [`scheduler::RequestManager`].

pub mod batch;
pub mod cli;
pub mod config;
pub mod engine;
pub mod scheduler;
pub mod telemetry;
pub mod tree;

pub use batch::{BatchDescriptor, Phase, RequestGuid};
pub use scheduler::{RequestManager, RequestRegistry, SchedulerConfig};
