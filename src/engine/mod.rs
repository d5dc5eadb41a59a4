//! Compute-engine seam.
//!
//! The scheduler never runs a model itself. It hands batch descriptors to
//! implementations of the traits below and folds their results back in.
//! [`driver`] runs that loop; [`sim`] is a deterministic stand-in model.

pub mod driver;
mod error;
pub mod sim;
mod tokenizer;

pub use driver::{run_incremental, run_speculative, DriverError, DriverOptions, DriverStats};
pub use error::EngineError;
pub use sim::CountingModel;
pub use tokenizer::{ByteTokenizer, Tokenizer, TokenizerError};

use crate::batch::{BeamResult, DecodeBatch, DecodeResult, ExpandBatch, VerifyBatch, VerifyResult};

/// Model that samples one token per occupied decode slot.
#[async_trait::async_trait]
pub trait DecodeEngine: Send + Sync {
    async fn decode(&self, batch: &DecodeBatch) -> Result<DecodeResult, EngineError>;
}

/// Draft model proposing up to `beam_width` candidates per expanding slot.
#[async_trait::async_trait]
pub trait DraftEngine: Send + Sync {
    async fn expand(&self, batch: &ExpandBatch) -> Result<BeamResult, EngineError>;
}

/// Verify model predicting the continuation at every submitted tree node.
#[async_trait::async_trait]
pub trait VerifyEngine: Send + Sync {
    async fn verify(&self, batch: &VerifyBatch) -> Result<VerifyResult, EngineError>;
}
