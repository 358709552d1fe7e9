//! # murmur-crypto
//!
//! Cryptographic primitives for the Murmur overlay.
//!
//! This crate provides:
//! - **BLAKE3** for hashing and key derivation
//! - **XChaCha20-Poly1305** for symmetric authenticated encryption
//! - **X25519** for ephemeral key exchange (asymmetric envelopes)
//! - **Ed25519** for message signatures
//!
//! ## Security
//!
//! All secret data uses `zeroize` for secure memory cleanup.
//! All comparisons of secrets use constant-time operations via `subtle`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod signing;
pub mod symmetric;
pub mod x25519;

pub use error::{CryptoError, Result};
pub use hash::Hash256;
pub use signing::{signing_keys_equal, Signature, SigningKeyPair, SigningPublicKey};
pub use symmetric::{decrypt, encrypt, EncryptedData, Nonce, SymmetricKey};
pub use x25519::{
    exchange_keys_equal, SharedSecret, X25519EphemeralKeyPair, X25519PublicKey,
    X25519StaticPrivateKey,
};
