//! # murmur-protocol
//!
//! Wire protocol and message formats for the Murmur overlay.
//!
//! This crate provides:
//! - **Topic**: fixed-width routing tag for coarse interest matching
//! - **Envelope**: the wire-visible, encrypted message container with
//!   proof-of-work and TTL metadata
//! - **SentMessage / ReceivedMessage**: plaintext framing, padding and
//!   signing on either side of the cipher
//!
//! ## Privacy Design
//!
//! An envelope reveals only its topic, size, timing metadata and key class
//! (symmetric envelopes carry an AEAD nonce, asymmetric ones an ephemeral
//! key inside the ciphertext blob). Sender identity, payload and padding
//! live inside the encrypted frame. Recipients are never named on the wire;
//! a node discovers the envelopes meant for it by trying its own keys.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod error;
pub mod limits;
pub mod message;
pub mod topic;

#[cfg(test)]
mod proptests;

pub use envelope::Envelope;
pub use error::{ProtocolError, Result};
pub use message::{MessageParams, ReceivedMessage, SentMessage};
pub use topic::Topic;
