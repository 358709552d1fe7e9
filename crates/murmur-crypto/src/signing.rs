//! Ed25519 message signatures.
//!
//! Envelopes may carry an optional signature inside the encrypted frame so
//! that recipients can authenticate the sender without the network learning
//! anything. Signer keys travel next to the signature (Ed25519 does not
//! support key recovery from a signature).
//!
//! ## Security Notes
//!
//! - Private keys are zeroized on drop
//! - [`SigningPublicKey`] keeps raw bytes so malformed keys stay
//!   representable; validation happens at verification and comparison time
//! - Weak (low-order) verifying keys never validate

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoError, Result};

/// Size of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 private key seed in bytes.
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// An Ed25519 signing key pair.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SigningKeyPair {
    bytes: [u8; PRIVATE_KEY_SIZE],
}

impl SigningKeyPair {
    /// Generate a new random signing key pair.
    pub fn generate() -> Self {
        let key = SigningKey::generate(&mut OsRng);
        Self {
            bytes: key.to_bytes(),
        }
    }

    /// Create from a raw private key seed.
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
    pub fn public_key(&self) -> SigningPublicKey {
        let key = SigningKey::from_bytes(&self.bytes);
        SigningPublicKey {
            bytes: key.verifying_key().to_bytes(),
        }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let key = SigningKey::from_bytes(&self.bytes);
        Signature {
            bytes: key.sign(message).to_bytes(),
        }
    }

    /// Get raw seed bytes (for serialization).
    ///
    /// # Security
    ///
    /// Handle with care - this exposes the private key.
    pub fn as_bytes(&self) -> &[u8; PRIVATE_KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKeyPair([REDACTED])")
    }
}

/// An Ed25519 public key for signature verification.
///
/// Holds raw bytes; use [`is_valid`](Self::is_valid) or
/// [`signing_keys_equal`] wherever a well-formed curve point is required.
#[derive(Clone)]
pub struct SigningPublicKey {
    bytes: [u8; PUBLIC_KEY_SIZE],
}

impl SigningPublicKey {
    /// Create from raw bytes.
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

    /// Check that this key decodes to a non-weak curve point.
    pub fn is_valid(&self) -> bool {
        match VerifyingKey::from_bytes(&self.bytes) {
            Ok(key) => !key.is_weak(),
            Err(_) => false,
        }
    }

    /// Verify a signature over a message.
    ///
    /// Returns false for malformed keys, malformed signatures, or a
    /// signature that does not match.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        if key.is_weak() {
            return false;
        }
        let sig = ed25519_dalek::Signature::from_bytes(&signature.bytes);
        key.verify(message, &sig).is_ok()
    }
}

impl std::fmt::Debug for SigningPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SigningPublicKey({:02x}{:02x}..)",
            self.bytes[0], self.bytes[1]
        )
    }
}

/// Compare two signing public keys for equality.
///
/// Two keys are equal iff both are valid curve points and their coordinate
/// bytes are equal. An invalid key never compares equal to anything,
/// including itself.
pub fn signing_keys_equal(a: &SigningPublicKey, b: &SigningPublicKey) -> bool {
    if !a.is_valid() || !b.is_valid() {
        return false;
    }
    bool::from(a.bytes.ct_eq(&b.bytes))
}

/// An Ed25519 signature.
#[derive(Clone)]
pub struct Signature {
    bytes: [u8; SIGNATURE_SIZE],
}

impl Signature {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidSignatureLength {
                expected: SIGNATURE_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SIGNATURE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Get the signature as bytes.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Signature({:02x}{:02x}..)",
            self.bytes[0], self.bytes[1]
        )
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for Signature {}
