//! The wire-visible envelope: encrypted payload plus PoW and TTL metadata.
//!
//! ## Envelope Structure
//!
//! ```text
//! +-----------------+
//! | expiry          | 8 bytes  - Unix seconds after which the envelope dies
//! +-----------------+
//! | ttl             | 4 bytes  - Lifetime the sender paid PoW for
//! +-----------------+
//! | topic           | 4 bytes  - Routing tag, in the clear
//! +-----------------+
//! | aead_nonce      | Optional - Present exactly for symmetric envelopes
//! +-----------------+
//! | data            | Variable - Ciphertext (asymmetric: ephemeral key,
//! |                 |            nonce and ciphertext concatenated)
//! +-----------------+
//! | nonce           | 8 bytes  - Proof-of-work nonce
//! +-----------------+
//! ```
//!
//! The presence of `aead_nonce` is the wire-visible key class: a filter
//! holding a symmetric key never attempts an asymmetric open and vice
//! versa. Which recipient an envelope is for is not visible at all - only
//! the ability to decrypt identifies it.
//!
//! ## Proof of Work
//!
//! `pow = 2^(leading zero bits of BLAKE3(seed || nonce)) / (size * ttl)`
//! where the seed hashes every field except the nonce. Bigger or
//! longer-lived envelopes need proportionally more work, so the score
//! prices network residency rather than raw hashes.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use murmur_crypto::symmetric::NONCE_SIZE;
use murmur_crypto::x25519::PUBLIC_KEY_SIZE;
use murmur_crypto::{
    decrypt, encrypt, EncryptedData, Hash256, Nonce, SymmetricKey, X25519EphemeralKeyPair,
    X25519PublicKey, X25519StaticPrivateKey,
};

use crate::error::{ProtocolError, Result};
use crate::limits::MAX_MESSAGE_SIZE;
use crate::topic::Topic;

/// Domain separator for envelope identity hashing.
const ENVELOPE_HASH_DOMAIN: &[u8] = b"MURMUR-ENVELOPE-HASH-v1";

/// Domain separator for the proof-of-work seed.
const POW_SEED_DOMAIN: &[u8] = b"MURMUR-ENVELOPE-POW-v1";

/// Key derivation context for asymmetric envelope encryption.
const MESSAGE_KEY_CONTEXT: &str = "murmur asymmetric envelope key v1";

/// Nonces tried per deadline check while sealing.
const SEAL_BATCH: u64 = 1024;

/// The wire-format container for an encrypted message.
///
/// Immutable once sealed; shared by reference across every filter that
/// evaluates it. The identity hash and PoW score are derived lazily and
/// cached, never serialized.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Unix timestamp (seconds) after which the envelope is dead.
    pub expiry: u64,
    /// Time-to-live in seconds the sender paid proof-of-work for.
    pub ttl: u32,
    /// Routing topic, visible to every relay.
    pub topic: Topic,
    /// AEAD nonce; present exactly when the envelope is symmetric-class.
    pub aead_nonce: Option<Nonce>,
    /// Encrypted payload.
    pub data: Vec<u8>,
    /// Proof-of-work nonce.
    pub nonce: u64,

    #[serde(skip)]
    cached_hash: OnceLock<Hash256>,
    #[serde(skip)]
    cached_pow: OnceLock<f64>,
}

impl Envelope {
    /// Create an unsealed envelope.
    ///
    /// `expiry` should already include the TTL; [`seal`](Self::seal) must
    /// be called before the envelope is sent.
    pub fn new(
        expiry: u64,
        ttl: u32,
        topic: Topic,
        aead_nonce: Option<Nonce>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            expiry,
            ttl,
            topic,
            aead_nonce,
            data,
            nonce: 0,
            cached_hash: OnceLock::new(),
            cached_pow: OnceLock::new(),
        }
    }

    /// Whether this envelope is symmetric-class (topic-keyed).
    pub fn is_symmetric(&self) -> bool {
        self.aead_nonce.is_some()
    }

    /// Whether this envelope is asymmetric-class (recipient-keyed).
    pub fn is_asymmetric(&self) -> bool {
        !self.is_symmetric()
    }

    /// Wire size of the envelope in bytes.
    pub fn size(&self) -> usize {
        // expiry + ttl + topic + option tag (+ nonce) + data length prefix
        // + data + pow nonce, matching the bincode fixed-int layout
        let aead = match &self.aead_nonce {
            Some(_) => 1 + NONCE_SIZE,
            None => 1,
        };
        8 + 4 + Topic::SIZE + aead + 8 + self.data.len() + 8
    }

    /// Content digest of the envelope; its identity for deduplication.
    pub fn hash(&self) -> Hash256 {
        self.cached_hash
            .get_or_init(|| {
                let aead = self
                    .aead_nonce
                    .as_ref()
                    .map(|n| n.as_bytes().as_slice())
                    .unwrap_or(&[]);
                Hash256::hash_many(&[
                    ENVELOPE_HASH_DOMAIN,
                    &self.expiry.to_le_bytes(),
                    &self.ttl.to_le_bytes(),
                    self.topic.as_bytes(),
                    aead,
                    &self.data,
                    &self.nonce.to_le_bytes(),
                ])
            })
            .clone()
    }

    /// Proof-of-work score of the envelope.
    ///
    /// A score of `x` means roughly `x * size * ttl` hash attempts were
    /// spent on the nonce. Lazily computed and cached.
    pub fn pow(&self) -> f64 {
        *self
            .cached_pow
            .get_or_init(|| pow_score(&self.pow_seed(), self.nonce, self.size(), self.ttl))
    }

    /// Whether the envelope has expired at `now` (Unix seconds).
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry < now
    }

    /// Mine a proof-of-work nonce.
    ///
    /// Runs for up to `work_time` seconds, keeping the best nonce found.
    /// Stops early once a nonzero `target` is reached.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::PowNotReached` if a nonzero target was not
    /// reached within the budget.
    pub fn seal(&mut self, target: f64, work_time: u32) -> Result<()> {
        let seed = self.pow_seed();
        let size = self.size();
        let deadline = Instant::now() + Duration::from_secs(u64::from(work_time));

        let mut best_zeros = 0u32;
        let mut best_nonce = 0u64;
        let mut nonce = 0u64;

        'mine: loop {
            for _ in 0..SEAL_BATCH {
                let zeros =
                    Hash256::hash_many(&[seed.as_bytes(), &nonce.to_le_bytes()])
                        .leading_zero_bits();
                if zeros > best_zeros {
                    best_zeros = zeros;
                    best_nonce = nonce;
                    if target > 0.0 && zeros_to_score(zeros, size, self.ttl) >= target {
                        break 'mine;
                    }
                }
                nonce = nonce.wrapping_add(1);
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        self.nonce = best_nonce;
        self.cached_hash = OnceLock::new();
        self.cached_pow = OnceLock::new();

        let achieved = self.pow();
        if target > 0.0 && achieved < target {
            return Err(ProtocolError::PowNotReached { target, achieved });
        }
        Ok(())
    }

    /// Attempt to open a symmetric-class envelope with a topic key.
    ///
    /// Returns the plaintext frame, or `None` if this envelope is not
    /// symmetric-class or the key does not fit. Failure here is the
    /// expected outcome for most filter/envelope pairs, not an error.
    pub fn open_symmetric(&self, key: &SymmetricKey) -> Option<Vec<u8>> {
        let nonce = self.aead_nonce.as_ref()?;
        let encrypted = EncryptedData {
            nonce: nonce.clone(),
            ciphertext: self.data.clone(),
        };
        decrypt(key, &encrypted).ok()
    }

    /// Attempt to open an asymmetric-class envelope with a private key.
    ///
    /// Parses the ephemeral sender key out of the data blob, performs the
    /// key exchange and decrypts. Returns `None` on any mismatch:
    /// wrong class, truncated blob, degenerate ephemeral key, wrong key.
    pub fn open_asymmetric(&self, key: &X25519StaticPrivateKey) -> Option<Vec<u8>> {
        if self.is_symmetric() {
            return None;
        }
        if self.data.len() < PUBLIC_KEY_SIZE + NONCE_SIZE {
            return None;
        }

        let ephemeral = X25519PublicKey::from_bytes(&self.data[..PUBLIC_KEY_SIZE]).ok()?;
        if !ephemeral.is_valid() {
            return None;
        }
        let nonce =
            Nonce::from_bytes(&self.data[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + NONCE_SIZE]).ok()?;

        let shared = key.diffie_hellman(&ephemeral);
        let aead_key = SymmetricKey::from_bytes(&shared.derive_key(MESSAGE_KEY_CONTEXT)).ok()?;
        let encrypted = EncryptedData {
            nonce,
            ciphertext: self.data[PUBLIC_KEY_SIZE + NONCE_SIZE..].to_vec(),
        };
        decrypt(&aead_key, &encrypted).ok()
    }

    /// Serialize for transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from transport bytes.
    ///
    /// # Errors
    ///
    /// Rejects inputs larger than [`MAX_MESSAGE_SIZE`](crate::limits::MAX_MESSAGE_SIZE)
    /// before deserializing, and malformed encodings after.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_MESSAGE_SIZE as usize {
            return Err(ProtocolError::OversizedEnvelope {
                size: bytes.len(),
                max: MAX_MESSAGE_SIZE as usize,
            });
        }
        bincode::deserialize(bytes).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    fn pow_seed(&self) -> Hash256 {
        let aead = self
            .aead_nonce
            .as_ref()
            .map(|n| n.as_bytes().as_slice())
            .unwrap_or(&[]);
        Hash256::hash_many(&[
            POW_SEED_DOMAIN,
            &self.expiry.to_le_bytes(),
            &self.ttl.to_le_bytes(),
            self.topic.as_bytes(),
            aead,
            &self.data,
        ])
    }
}

/// Encrypt a plaintext frame under a topic key for a symmetric envelope.
///
/// Returns the AEAD nonce (carried in the clear on the envelope) and the
/// ciphertext.
pub(crate) fn seal_symmetric_payload(
    key: &SymmetricKey,
    plaintext: &[u8],
) -> Result<(Nonce, Vec<u8>)> {
    let encrypted = encrypt(key, plaintext)?;
    Ok((encrypted.nonce, encrypted.ciphertext))
}

/// Encrypt a plaintext frame to a recipient key for an asymmetric envelope.
///
/// Output layout: `ephemeral public key || AEAD nonce || ciphertext`. The
/// ephemeral private half is consumed by the key exchange and never stored.
pub(crate) fn seal_asymmetric_payload(
    recipient: &X25519PublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let ephemeral = X25519EphemeralKeyPair::generate();
    let ephemeral_public = ephemeral.public_key().clone();

    let shared = ephemeral.diffie_hellman(recipient);
    let aead_key = SymmetricKey::from_bytes(&shared.derive_key(MESSAGE_KEY_CONTEXT))?;
    let encrypted = encrypt(&aead_key, plaintext)?;

    let mut data =
        Vec::with_capacity(PUBLIC_KEY_SIZE + NONCE_SIZE + encrypted.ciphertext.len());
    data.extend_from_slice(ephemeral_public.as_bytes());
    data.extend_from_slice(encrypted.nonce.as_bytes());
    data.extend_from_slice(&encrypted.ciphertext);
    Ok(data)
}

fn zeros_to_score(zeros: u32, size: usize, ttl: u32) -> f64 {
    let divisor = (size as f64) * f64::from(ttl.max(1));
    2f64.powi(zeros as i32) / divisor
}

fn pow_score(seed: &Hash256, nonce: u64, size: usize, ttl: u32) -> f64 {
    let zeros = Hash256::hash_many(&[seed.as_bytes(), &nonce.to_le_bytes()]).leading_zero_bits();
    zeros_to_score(zeros, size, ttl)
}
