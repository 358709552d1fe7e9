//! Error types for protocol operations.

use thiserror::Error;

/// Errors that can occur during protocol operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Cryptographic operation failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] murmur_crypto::CryptoError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid envelope format.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Envelope exceeds the maximum allowed size.
    #[error("Oversized envelope: {size} bytes exceeds maximum {max} bytes")]
    OversizedEnvelope {
        /// Actual envelope size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message parameters carry neither a symmetric key nor a recipient key.
    #[error("No encryption key supplied")]
    MissingKey,

    /// Proof-of-work target was not reached within the time budget.
    #[error("Failed to reach PoW target {target} (achieved {achieved})")]
    PowNotReached {
        /// Requested PoW target.
        target: f64,
        /// Best score achieved within the budget.
        achieved: f64,
    },

    /// Payload exceeds the maximum allowed size.
    #[error("Oversized payload: {size} bytes exceeds maximum {max} bytes")]
    OversizedPayload {
        /// Actual payload size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
