//! BLAKE3 hashing primitives.
//!
//! Provides the 256-bit hash type used for envelope identities, symmetric
//! key fingerprints and proof-of-work scoring.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// A 256-bit (32-byte) hash value using BLAKE3.
#[derive(Clone, Default, Serialize, Deserialize, Zeroize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Hash size in bytes.
    pub const SIZE: usize = 32;

    /// Create a Hash256 from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(crate::CryptoError::InvalidHashLength {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Get the hash as a byte slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to owned byte array.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Hash a single input.
    pub fn hash(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Self(*hash.as_bytes())
    }

    /// Hash multiple inputs (domain separation).
    ///
    /// Each input is length-prefixed to prevent ambiguity.
    pub fn hash_many(inputs: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for input in inputs {
            hasher.update(&(input.len() as u64).to_le_bytes());
            hasher.update(input);
        }
        let hash = hasher.finalize();
        Self(*hash.as_bytes())
    }

    /// Count the leading zero bits of this hash.
    ///
    /// Used by the proof-of-work score: more leading zeros means more work
    /// was spent finding the nonce.
    pub fn leading_zero_bits(&self) -> u32 {
        let mut zeros = 0;
        for byte in &self.0 {
            if *byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }

    /// Format as hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| crate::CryptoError::InvalidHexFormat(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl ConstantTimeEq for Hash256 {
    fn ct_eq(&self, other: &Self) -> subtle::Choice {
        self.0.ct_eq(&other.0)
    }
}

impl PartialEq for Hash256 {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time: hashes may derive from key material (fingerprints)
        self.ct_eq(other).into()
    }
}

impl Eq for Hash256 {}

impl std::hash::Hash for Hash256 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Bucket selection only, not a cryptographic operation
        self.0.hash(state);
    }
}

impl std::fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash256({})", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let data = b"hello world";
        let h1 = Hash256::hash(data);
        let h2 = Hash256::hash(data);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_hash_different_inputs() {
        let h1 = Hash256::hash(b"hello");
        let h2 = Hash256::hash(b"world");
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_hash_many_length_prefixed() {
        let h1 = Hash256::hash_many(&[b"hello", b"world"]);
        let h2 = Hash256::hash_many(&[b"helloworld"]);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_hex_roundtrip() {
        let h = Hash256::hash(b"test");
        let hex = h.to_hex();
        let h2 = Hash256::from_hex(&hex).unwrap();
        assert_eq!(h, h2);
    }

    #[test]
    fn test_from_bytes_invalid_length() {
        let bytes = [0u8; 16];
        assert!(Hash256::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_leading_zero_bits() {
        let zero = Hash256::default();
        assert_eq!(zero.leading_zero_bits(), 256);

        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        let h = Hash256::from_bytes(&bytes).unwrap();
        assert_eq!(h.leading_zero_bits(), 7);

        bytes[0] = 0x80;
        let h = Hash256::from_bytes(&bytes).unwrap();
        assert_eq!(h.leading_zero_bits(), 0);

        bytes[0] = 0x00;
        bytes[1] = 0xff;
        let h = Hash256::from_bytes(&bytes).unwrap();
        assert_eq!(h.leading_zero_bits(), 8);
    }
}
