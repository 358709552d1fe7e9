//! X25519 Diffie-Hellman key exchange.
//!
//! Asymmetric-class envelopes are encrypted to an X25519 public key: the
//! sender generates an ephemeral key pair, performs ECDH with the
//! recipient's key, and derives the AEAD key from the shared secret.
//!
//! ## Security Notes
//!
//! - Private keys are zeroized on drop
//! - Uses OsRng for key generation
//! - Low-order public keys are rejected (they would produce a zero or
//!   predictable shared secret)

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoError, Result};

/// Size of X25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of X25519 private key in bytes.
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Size of shared secret in bytes.
pub const SHARED_SECRET_SIZE: usize = 32;

/// Known low-order points on Curve25519 that must be rejected.
///
/// These points have small order; using them in ECDH results in a zero or
/// predictable shared secret.
const LOW_ORDER_POINTS: [[u8; 32]; 8] = [
    // Point at infinity (order 1)
    [
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0,
    ],
    // Point of order 8
    [
        1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0,
    ],
    // Other low-order points (orders 2, 4, 8)
    [
        0xe0, 0xeb, 0x7a, 0x7c, 0x3b, 0x41, 0xb8, 0xae, 0x16, 0x56, 0xe3, 0xfa, 0xf1, 0x9f, 0xc4,
        0x6a, 0xda, 0x09, 0x8d, 0xeb, 0x9c, 0x32, 0xb1, 0xfd, 0x86, 0x62, 0x05, 0x16, 0x5f, 0x49,
        0xb8, 0x00,
    ],
    [
        0x5f, 0x9c, 0x95, 0xbc, 0xa3, 0x50, 0x8c, 0x24, 0xb1, 0xd0, 0xb1, 0x55, 0x9c, 0x83, 0xef,
        0x5b, 0x04, 0x44, 0x5c, 0xc4, 0x58, 0x1c, 0x8e, 0x86, 0xd8, 0x22, 0x4e, 0xdd, 0xd0, 0x9f,
        0x11, 0x57,
    ],
    [
        0xec, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x7f,
    ],
    [
        0xed, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x7f,
    ],
    [
        0xee, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x7f,
    ],
    // Non-canonical point (x >= p, the field prime)
    [
        0xed, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff,
    ],
];

/// X25519 public key for key exchange.
#[derive(Clone, Serialize, Deserialize)]
pub struct X25519PublicKey {
    bytes: [u8; PUBLIC_KEY_SIZE],
}

impl X25519PublicKey {
    /// Create from raw bytes.
    ///
    /// Only the length is checked here; degenerate curve points are kept
    /// representable so that [`is_valid`](Self::is_valid) and
    /// [`exchange_keys_equal`] can reject them at comparison time.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; PUBLIC_KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Get the key as bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.bytes
    }

    /// Convert to byte array.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.bytes
    }

    /// Check that this key is a usable curve point.
    ///
    /// Rejects the known low-order points and the non-canonical encoding.
    pub fn is_valid(&self) -> bool {
        !LOW_ORDER_POINTS
            .iter()
            .any(|p| bool::from(self.bytes.ct_eq(p)))
    }
}

impl std::fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "X25519PublicKey({:02x}{:02x}..)",
            self.bytes[0], self.bytes[1]
        )
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(key: PublicKey) -> Self {
        Self {
            bytes: key.to_bytes(),
        }
    }
}

impl From<&X25519PublicKey> for PublicKey {
    fn from(key: &X25519PublicKey) -> Self {
        PublicKey::from(key.bytes)
    }
}

/// Compare two exchange public keys for equality.
///
/// Two keys are equal iff both are valid curve points and their coordinate
/// bytes are equal. An invalid key never compares equal to anything,
/// including itself.
pub fn exchange_keys_equal(a: &X25519PublicKey, b: &X25519PublicKey) -> bool {
    if !a.is_valid() || !b.is_valid() {
        return false;
    }
    bool::from(a.bytes.ct_eq(&b.bytes))
}

/// X25519 private key (static) for key exchange.
///
/// Use this for long-lived decryption keys that need persistence.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct X25519StaticPrivateKey {
    bytes: [u8; PRIVATE_KEY_SIZE],
}

impl X25519StaticPrivateKey {
    /// Generate a new random private key.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self {
            bytes: secret.to_bytes(),
        }
    }

    /// Create from raw bytes.
    ///
    /// # Security
    ///
    /// Only use bytes from a secure source.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PRIVATE_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PRIVATE_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; PRIVATE_KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Get the corresponding public key.
    pub fn public_key(&self) -> X25519PublicKey {
        let secret = StaticSecret::from(self.bytes);
        let public = PublicKey::from(&secret);
        X25519PublicKey::from(public)
    }

    /// Perform Diffie-Hellman key exchange.
    pub fn diffie_hellman(&self, peer_public: &X25519PublicKey) -> SharedSecret {
        let secret = StaticSecret::from(self.bytes);
        let peer = PublicKey::from(peer_public);
        let shared = secret.diffie_hellman(&peer);
        SharedSecret {
            bytes: shared.to_bytes(),
        }
    }

    /// Get raw bytes (for serialization).
    ///
    /// # Security
    ///
    /// Handle with care - this exposes the private key.
    pub fn as_bytes(&self) -> &[u8; PRIVATE_KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for X25519StaticPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "X25519StaticPrivateKey([REDACTED])")
    }
}

/// X25519 ephemeral key pair for single-use key exchange.
///
/// Each asymmetric envelope is encrypted under a fresh ephemeral pair; the
/// private half is discarded immediately after deriving the shared secret.
pub struct X25519EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl X25519EphemeralKeyPair {
    /// Generate a new ephemeral key pair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public_key = PublicKey::from(&secret);
        Self {
            secret,
            public: X25519PublicKey::from(public_key),
        }
    }

    /// Get the public key.
    pub fn public_key(&self) -> &X25519PublicKey {
        &self.public
    }

    /// Perform Diffie-Hellman and consume the ephemeral key.
    pub fn diffie_hellman(self, peer_public: &X25519PublicKey) -> SharedSecret {
        let peer = PublicKey::from(peer_public);
        let shared = self.secret.diffie_hellman(&peer);
        SharedSecret {
            bytes: shared.to_bytes(),
        }
    }
}

impl std::fmt::Debug for X25519EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "X25519EphemeralKeyPair {{ public: {:?} }}", self.public)
    }
}

/// Shared secret derived from Diffie-Hellman key exchange.
///
/// This should be used as input to a KDF, not directly as an encryption key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: [u8; SHARED_SECRET_SIZE],
}

impl SharedSecret {
    /// Derive an encryption key using BLAKE3 key derivation.
    pub fn derive_key(&self, context: &str) -> [u8; 32] {
        blake3::derive_key(context, &self.bytes)
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}
