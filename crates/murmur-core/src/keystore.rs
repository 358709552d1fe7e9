//! In-memory key store for symmetric topic keys and identity key pairs.
//!
//! Keys are referenced everywhere else by opaque random id strings; raw key
//! bytes never leave the store except as the copy a [`Filter`] holds for
//! its lifetime, or an explicit export.
//!
//! ## Security
//!
//! - Ids are 32 bytes of OS randomness, hex encoded
//! - Password-derived keys use Argon2id with hardened parameters and a
//!   fixed protocol salt, so every participant derives the same key from
//!   a shared password
//! - Key material is zeroized on drop by the underlying types
//!
//! [`Filter`]: crate::filter::Filter

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;

use murmur_crypto::{SigningKeyPair, SigningPublicKey, SymmetricKey, X25519StaticPrivateKey};
use murmur_protocol::limits::SYM_KEY_SIZE;

use crate::error::{CoreError, Result};

// Argon2id parameters (hardened for key derivation)
// Memory: 64 MiB, Iterations: 3, Parallelism: 4
const ARGON2_M_COST: u32 = 64 * 1024;
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;

/// Fixed salt for password-derived topic keys.
///
/// Deterministic on purpose: a password names the same symmetric key on
/// every node, which is what makes password-protected topics work.
const PASSWORD_KEY_SALT: &[u8] = b"MURMUR-PASSWORD-KEY-SALT-v1";

/// Generate a fresh random id: 32 bytes of OS randomness, hex encoded.
pub fn random_id() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A node identity: an exchange key for decryption and a signing key.
///
/// One id covers both halves, so a single registration lets a client both
/// receive asymmetric envelopes and sign outgoing messages.
pub struct KeyPair {
    exchange: X25519StaticPrivateKey,
    signing: SigningKeyPair,
}

impl KeyPair {
    /// Generate a fresh key pair.
    pub fn generate() -> Self {
        Self {
            exchange: X25519StaticPrivateKey::generate(),
            signing: SigningKeyPair::generate(),
        }
    }

    /// Reassemble from raw parts.
    pub fn new(exchange: X25519StaticPrivateKey, signing: SigningKeyPair) -> Self {
        Self { exchange, signing }
    }

    /// The exchange (decryption) private key.
    pub fn exchange(&self) -> &X25519StaticPrivateKey {
        &self.exchange
    }

    /// The signing key.
    pub fn signing(&self) -> &SigningKeyPair {
        &self.signing
    }

    /// The public exchange key others encrypt to.
    pub fn public_exchange_key(&self) -> murmur_crypto::X25519PublicKey {
        self.exchange.public_key()
    }

    /// The public signing key others verify against.
    pub fn public_signing_key(&self) -> SigningPublicKey {
        self.signing.public_key()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("exchange", &self.public_exchange_key())
            .field("signing", &self.public_signing_key())
            .finish()
    }
}

/// Thread-safe registry of symmetric keys and key pairs, by id.
#[derive(Default)]
pub struct KeyStore {
    sym_keys: RwLock<HashMap<String, SymmetricKey>>,
    key_pairs: RwLock<HashMap<String, Arc<KeyPair>>>,
}

impl KeyStore {
    /// Create an empty key store.
    pub fn new() -> Self {
        Self::default()
    }

    // === Key pairs ===

    /// Generate and store a fresh key pair, returning its id.
    pub fn new_key_pair(&self) -> Result<String> {
        self.add_key_pair(KeyPair::generate())
    }

    /// Store an existing key pair, returning its id.
    pub fn add_key_pair(&self, pair: KeyPair) -> Result<String> {
        let id = random_id();
        let mut pairs = self.key_pairs.write().unwrap();
        if pairs.contains_key(&id) {
            return Err(CoreError::IdCollision);
        }
        pairs.insert(id.clone(), Arc::new(pair));
        tracing::debug!(id = %id, "key pair added");
        Ok(id)
    }

    /// Look up a key pair by id.
    pub fn get_key_pair(&self, id: &str) -> Option<Arc<KeyPair>> {
        self.key_pairs.read().unwrap().get(id).cloned()
    }

    /// Whether a key pair exists under the given id.
    pub fn has_key_pair(&self, id: &str) -> bool {
        self.key_pairs.read().unwrap().contains_key(id)
    }

    /// Remove a key pair; returns whether one existed.
    pub fn delete_key_pair(&self, id: &str) -> bool {
        let removed = self.key_pairs.write().unwrap().remove(id).is_some();
        if removed {
            tracing::debug!(id = %id, "key pair deleted");
        }
        removed
    }

    // === Symmetric keys ===

    /// Generate and store a fresh random symmetric key, returning its id.
    pub fn generate_sym_key(&self) -> Result<String> {
        self.add_sym_key_direct(SymmetricKey::generate())
    }

    /// Import raw symmetric key bytes, returning the new id.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidSymmetricKey` for a wrong-length key.
    pub fn add_sym_key(&self, bytes: &[u8]) -> Result<String> {
        if bytes.len() != SYM_KEY_SIZE {
            return Err(CoreError::InvalidSymmetricKey);
        }
        let key = SymmetricKey::from_bytes(bytes).map_err(|_| CoreError::InvalidSymmetricKey)?;
        self.add_sym_key_direct(key)
    }

    /// Store an existing symmetric key, returning its id.
    pub fn add_sym_key_direct(&self, key: SymmetricKey) -> Result<String> {
        let id = random_id();
        let mut keys = self.sym_keys.write().unwrap();
        if keys.contains_key(&id) {
            return Err(CoreError::IdCollision);
        }
        keys.insert(id.clone(), key);
        tracing::debug!(id = %id, "symmetric key added");
        Ok(id)
    }

    /// Derive a symmetric key from a password and store it.
    ///
    /// Argon2id with a fixed protocol salt: the same password always yields
    /// the same key, on every node.
    pub fn add_sym_key_from_password(&self, password: &str) -> Result<String> {
        let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(SYM_KEY_SIZE))
            .map_err(|_| CoreError::InvalidSymmetricKey)?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut derived = [0u8; SYM_KEY_SIZE];
        argon2
            .hash_password_into(password.as_bytes(), PASSWORD_KEY_SALT, &mut derived)
            .map_err(|_| CoreError::InvalidSymmetricKey)?;

        let key = SymmetricKey::from_bytes(&derived).map_err(|_| CoreError::InvalidSymmetricKey)?;
        self.add_sym_key_direct(key)
    }

    /// Look up a symmetric key by id.
    pub fn get_sym_key(&self, id: &str) -> Option<SymmetricKey> {
        self.sym_keys.read().unwrap().get(id).cloned()
    }

    /// Whether a symmetric key exists under the given id.
    pub fn has_sym_key(&self, id: &str) -> bool {
        self.sym_keys.read().unwrap().contains_key(id)
    }

    /// Remove a symmetric key; returns whether one existed.
    pub fn delete_sym_key(&self, id: &str) -> bool {
        let removed = self.sym_keys.write().unwrap().remove(id).is_some();
        if removed {
            tracing::debug!(id = %id, "symmetric key deleted");
        }
        removed
    }
}
