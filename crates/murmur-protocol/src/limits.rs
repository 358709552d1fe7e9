//! Protocol limits and constants.
//!
//! All protocol limits are defined here for consistent enforcement.

// === Envelopes ===

/// Default time-to-live for outgoing envelopes in seconds.
pub const DEFAULT_TTL_SECS: u32 = 50;

/// Default maximum accepted envelope size in bytes (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Hard upper bound on the accepted envelope size in bytes (10 MiB).
///
/// Also caps pre-deserialization allocation when decoding envelopes
/// received from the network.
pub const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

/// Allowance for clock drift between peers when checking expiry, in seconds.
pub const EXPIRY_SLACK_SECS: u64 = 10;

// === Proof of work ===

/// Default minimum PoW score a node requires before relaying an envelope.
pub const DEFAULT_MIN_POW: f64 = 0.2;

// === Privacy ===

/// Plaintext frames are padded to a multiple of this size before
/// encryption, so ciphertext length reveals only a coarse size bucket.
pub const PADDING_UNIT: usize = 256;

// === Keys ===

/// Required length of a symmetric topic key in bytes.
pub const SYM_KEY_SIZE: usize = murmur_crypto::symmetric::KEY_SIZE;
