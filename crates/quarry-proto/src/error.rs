//! Codec error types.

use thiserror::Error;

/// Errors raised while encoding or decoding IR values.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A JSON request document could not be decoded.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] serde_json::Error),
}
