//! Fixed-width routing topics.
//!
//! A topic is a 4-byte tag attached in the clear to every envelope. It is
//! the only routing hint the network sees: coarse enough that it does not
//! identify a recipient, cheap enough that nodes can pre-filter interest
//! without any cryptography.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// A fixed-width envelope routing tag.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic([u8; 4]);

impl Topic {
    /// Topic size in bytes.
    pub const SIZE: usize = 4;

    /// Create a topic from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 4 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(ProtocolError::InvalidEnvelope(format!(
                "invalid topic length: expected {}, got {}",
                Self::SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Get the topic as a byte slice.
    pub fn as_bytes(&self) -> &[u8; Topic::SIZE] {
        &self.0
    }

    /// Convert to owned byte array.
    pub fn to_bytes(&self) -> [u8; Topic::SIZE] {
        self.0
    }
}

impl From<[u8; Topic::SIZE]> for Topic {
    fn from(bytes: [u8; Topic::SIZE]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Topic(0x{})", hex::encode(self.0))
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_roundtrip() {
        let topic = Topic::from_bytes(&[0xaa, 0xbb, 0xcc, 0xdd]).unwrap();
        assert_eq!(topic.as_bytes(), &[0xaa, 0xbb, 0xcc, 0xdd]);
    }

    #[test]
    fn test_from_bytes_wrong_length() {
        assert!(Topic::from_bytes(&[1, 2, 3]).is_err());
        assert!(Topic::from_bytes(&[1, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn test_display_hex() {
        let topic = Topic::from([0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(format!("{}", topic), "0xdeadbeef");
    }
}
