//! Tokenizer seam used for text registration and output decoding.

use thiserror::Error;

use crate::tree::TokenId;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid token ID: {0}")]
    InvalidToken(TokenId),
}

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>, TokenizerError>;
    fn decode(&self, tokens: &[TokenId]) -> Result<String, TokenizerError>;
}

/// One token per byte. Vocabulary size 256.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer;

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>, TokenizerError> {
        Ok(text.bytes().map(TokenId::from).collect())
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String, TokenizerError> {
        let bytes = tokens
            .iter()
            .map(|&t| u8::try_from(t).map_err(|_| TokenizerError::InvalidToken(t)))
            .collect::<Result<Vec<u8>, _>>()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
