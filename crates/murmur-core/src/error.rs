//! Error types for the filter engine and request API.
//!
//! Only caller mistakes, policy rejections and internal defects surface as
//! errors. Expected per-envelope outcomes - a failed decryption against the
//! wrong key, a topic or PoW mismatch, a duplicate already buffered - are
//! quiet non-matches, reported as `Option`/`bool` and logged at trace level
//! at most.

use thiserror::Error;

/// Errors that can occur during filter engine and request API operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Neither or both of the symmetric / asymmetric key ids were supplied.
    #[error("specify either a symmetric or an asymmetric key")]
    SymAsym,

    /// A symmetric subscription or post carried no topic.
    #[error("missing topic(s)")]
    NoTopics,

    /// The resolved symmetric key has the wrong length.
    #[error("invalid symmetric key")]
    InvalidSymmetricKey,

    /// The supplied recipient public key is malformed.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// The supplied signer public key is malformed.
    #[error("invalid signing public key")]
    InvalidSigningPubKey,

    /// A topic entry is empty or oversized.
    #[error("topic {index} has wrong size: {len}")]
    BadTopic {
        /// Index of the offending entry in the request.
        index: usize,
        /// Its length in bytes.
        len: usize,
    },

    /// Requested PoW target is below the node's minimum (broadcast only).
    #[error("message rejected, PoW too low")]
    TooLowPow,

    /// No key is registered under the given id.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// No filter is registered under the given id.
    #[error("filter not found: {0}")]
    FilterNotFound(String),

    /// Freshly generated random id collided with an existing entry.
    ///
    /// This indicates an id-space or randomness defect, not caller fault.
    #[error("failed to generate unique ID")]
    IdCollision,

    /// Envelope exceeds the node's configured maximum message size.
    #[error("oversized message: {size} bytes exceeds maximum {max} bytes")]
    OversizedMessage {
        /// Actual size in bytes.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A node tunable was set to an unusable value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The transport rejected a send or broadcast.
    #[error("transport error: {0}")]
    Transport(String),

    /// Cryptographic operation failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] murmur_crypto::CryptoError),

    /// Protocol operation failed.
    #[error("Protocol error: {0}")]
    Protocol(#[from] murmur_protocol::ProtocolError),
}

/// Result type for filter engine and request API operations.
pub type Result<T> = std::result::Result<T, CoreError>;
