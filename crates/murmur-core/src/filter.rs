//! The filter registry: matching, decryption and delivery buffering.
//!
//! A [`Filter`] is one subscriber's standing interest: exactly one key
//! (symmetric topic key or asymmetric key pair), optional required signer,
//! topic patterns, a PoW floor, and the pending-message buffer the
//! subscriber drains. [`Filters`] owns every installed filter and is the
//! dispatch point each inbound envelope passes through.
//!
//! ## Matching order
//!
//! Per filter, the cheap checks strictly precede the expensive one:
//! PoW floor, then key class, then topic - only then is decryption
//! attempted. Within one dispatch pass an envelope is decrypted at most
//! once per key class; filters sharing a class test the already-opened
//! message instead.
//!
//! ## Locking
//!
//! The registry lock guards membership only. Dispatch clones a snapshot of
//! the watcher set and decrypts outside every lock; each filter's pending
//! buffer has its own mutex, so subscribers never contend with each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, trace};

use murmur_crypto::{
    exchange_keys_equal, signing_keys_equal, Hash256, SigningPublicKey, SymmetricKey,
};
use murmur_protocol::{Envelope, ReceivedMessage, Topic};

use crate::error::{CoreError, Result};
use crate::keystore::{random_id, KeyPair};

/// Domain separator for symmetric key fingerprints.
const SYM_FINGERPRINT_DOMAIN: &[u8] = b"MURMUR-SYM-KEY-FINGERPRINT-v1";

/// Fingerprint of a symmetric key, used for O(1) matching of already
/// opened messages against filters.
pub fn sym_key_fingerprint(key: &SymmetricKey) -> Hash256 {
    Hash256::hash_many(&[SYM_FINGERPRINT_DOMAIN, key.as_bytes()])
}

/// The key a filter decrypts with.
///
/// A filter is symmetric-keyed or asymmetric-keyed, never both - the
/// variant makes the exclusivity structural instead of a runtime check.
pub enum FilterKey {
    /// Shared topic key plus its precomputed fingerprint.
    Symmetric {
        /// The shared key.
        key: SymmetricKey,
        /// Fingerprint for fast message matching.
        fingerprint: Hash256,
    },
    /// Recipient key pair.
    Asymmetric {
        /// The subscriber's key pair; the exchange half opens envelopes.
        key_pair: Arc<KeyPair>,
    },
}

impl FilterKey {
    /// Build a symmetric filter key, precomputing the fingerprint.
    pub fn symmetric(key: SymmetricKey) -> Self {
        let fingerprint = sym_key_fingerprint(&key);
        Self::Symmetric { key, fingerprint }
    }

    /// Build an asymmetric filter key.
    pub fn asymmetric(key_pair: Arc<KeyPair>) -> Self {
        Self::Asymmetric { key_pair }
    }

    /// Whether this is the symmetric variant.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::Symmetric { .. })
    }
}

impl std::fmt::Debug for FilterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Symmetric { fingerprint, .. } => f
                .debug_struct("FilterKey::Symmetric")
                .field("fingerprint", fingerprint)
                .finish_non_exhaustive(),
            Self::Asymmetric { key_pair } => f
                .debug_struct("FilterKey::Asymmetric")
                .field("public", &key_pair.public_exchange_key())
                .finish(),
        }
    }
}

/// One subscriber's matching criteria plus its pending-message buffer.
#[derive(Debug)]
pub struct Filter {
    key: FilterKey,
    src: Option<SigningPublicKey>,
    topics: Vec<Vec<u8>>,
    min_pow: f64,
    allow_p2p: bool,
    pending: Mutex<HashMap<Hash256, ReceivedMessage>>,
}

impl Filter {
    /// Create a filter.
    ///
    /// `topics` are match patterns: an empty list matches every topic;
    /// patterns longer than the topic width are truncated during matching.
    pub fn new(
        key: FilterKey,
        src: Option<SigningPublicKey>,
        topics: Vec<Vec<u8>>,
        min_pow: f64,
        allow_p2p: bool,
    ) -> Self {
        Self {
            key,
            src,
            topics,
            min_pow,
            allow_p2p,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// The filter's key.
    pub fn key(&self) -> &FilterKey {
        &self.key
    }

    /// Required signer, if any.
    pub fn src(&self) -> Option<&SigningPublicKey> {
        self.src.as_ref()
    }

    /// The filter's PoW floor.
    pub fn min_pow(&self) -> f64 {
        self.min_pow
    }

    /// Whether the filter accepts direct peer-to-peer messages.
    pub fn allow_p2p(&self) -> bool {
        self.allow_p2p
    }

    /// Whether this filter opens symmetric-class envelopes.
    pub fn expects_symmetric(&self) -> bool {
        self.key.is_symmetric()
    }

    /// Cheap pre-decryption check: PoW floor, key class, topic.
    ///
    /// Must pass before [`open`](Self::open) is attempted; the PoW check
    /// comes first because it is the cheapest.
    pub fn match_envelope(&self, envelope: &Envelope) -> bool {
        if self.min_pow > 0.0 && envelope.pow() < self.min_pow {
            return false;
        }
        if self.expects_symmetric() != envelope.is_symmetric() {
            return false;
        }
        self.match_topic(&envelope.topic)
    }

    /// Test an already-opened message against this filter.
    ///
    /// Used when another filter's open produced the message; checks that
    /// this filter's key would have produced the same one (fingerprint or
    /// recipient-key equality) without decrypting again.
    pub fn match_message(&self, message: &ReceivedMessage) -> bool {
        if self.min_pow > 0.0 && message.pow < self.min_pow {
            return false;
        }
        let key_matches = match &self.key {
            FilterKey::Symmetric { fingerprint, .. } => message
                .sym_key_hash
                .as_ref()
                .is_some_and(|hash| hash == fingerprint),
            FilterKey::Asymmetric { key_pair } => message
                .dst
                .as_ref()
                .is_some_and(|dst| exchange_keys_equal(dst, &key_pair.public_exchange_key())),
        };
        key_matches && self.match_topic(&message.topic)
    }

    /// Whether a topic satisfies this filter's patterns.
    ///
    /// Zero patterns is a wildcard. Otherwise any pattern whose bytes equal
    /// the topic's leading bytes matches; over-length patterns are
    /// truncated to the topic width and empty patterns never match.
    pub fn match_topic(&self, topic: &Topic) -> bool {
        if self.topics.is_empty() {
            return true;
        }
        self.topics
            .iter()
            .any(|pattern| match_single_topic(topic, pattern))
    }

    /// Attempt to decrypt an envelope with this filter's key.
    ///
    /// On success the message carries the provenance stamp for the key
    /// class: the symmetric key's fingerprint, or the recipient public key.
    /// Returns `None` on any failure - the expected outcome for most
    /// filter/envelope pairs.
    pub fn open(&self, envelope: &Envelope) -> Option<ReceivedMessage> {
        match &self.key {
            FilterKey::Symmetric { key, fingerprint } => {
                let plaintext = envelope.open_symmetric(key)?;
                let mut message = ReceivedMessage::parse(envelope, &plaintext)?;
                message.sym_key_hash = Some(fingerprint.clone());
                Some(message)
            }
            FilterKey::Asymmetric { key_pair } => {
                let plaintext = envelope.open_asymmetric(key_pair.exchange())?;
                let mut message = ReceivedMessage::parse(envelope, &plaintext)?;
                message.dst = Some(key_pair.public_exchange_key());
                Some(message)
            }
        }
    }

    /// Buffer a matched message, keyed by its envelope hash.
    ///
    /// Idempotent: redelivery of the same envelope (flood-routing
    /// duplicates) leaves exactly one buffered entry.
    pub fn trigger(&self, message: ReceivedMessage) {
        let mut pending = self.pending.lock().unwrap();
        if let std::collections::hash_map::Entry::Vacant(entry) =
            pending.entry(message.envelope_hash.clone())
        {
            entry.insert(message);
        } else {
            trace!(envelope = %message.envelope_hash, "duplicate envelope, already buffered");
        }
    }

    /// Drain the pending buffer.
    ///
    /// Atomically swaps the buffer for an empty one and returns the
    /// previous contents; ordering is unspecified. This is the only way
    /// buffered messages are removed.
    pub fn retrieve(&self) -> Vec<ReceivedMessage> {
        let mut pending = self.pending.lock().unwrap();
        std::mem::take(&mut *pending).into_values().collect()
    }
}

/// Truncating byte-prefix topic match.
fn match_single_topic(topic: &Topic, pattern: &[u8]) -> bool {
    let pattern = if pattern.len() > Topic::SIZE {
        &pattern[..Topic::SIZE]
    } else {
        pattern
    };
    if pattern.is_empty() {
        return false;
    }
    topic.as_bytes().iter().zip(pattern).all(|(a, b)| a == b)
}

/// The registry of installed filters: the dispatch point for every inbound
/// envelope.
#[derive(Default)]
pub struct Filters {
    watchers: RwLock<HashMap<String, Arc<Filter>>>,
}

impl Filters {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a filter under a fresh random id and return the id.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::IdCollision` if the generated id already exists;
    /// an existing filter is never overwritten.
    pub fn install(&self, filter: Filter) -> Result<String> {
        let id = random_id();
        let mut watchers = self.watchers.write().unwrap();
        if watchers.contains_key(&id) {
            return Err(CoreError::IdCollision);
        }
        debug!(id = %id, symmetric = filter.expects_symmetric(), "filter installed");
        watchers.insert(id.clone(), Arc::new(filter));
        Ok(id)
    }

    /// Remove a filter; returns whether one existed. Idempotent.
    pub fn uninstall(&self, id: &str) -> bool {
        let removed = self.watchers.write().unwrap().remove(id).is_some();
        if removed {
            debug!(id = %id, "filter uninstalled");
        }
        removed
    }

    /// Look up a filter by id.
    pub fn get(&self, id: &str) -> Option<Arc<Filter>> {
        self.watchers.read().unwrap().get(id).cloned()
    }

    /// Number of installed filters.
    pub fn len(&self) -> usize {
        self.watchers.read().unwrap().len()
    }

    /// Whether no filters are installed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fan an inbound envelope out to every matching filter.
    ///
    /// Called once per newly received envelope. Decryption happens at most
    /// once per key class per call: the first filter to open the envelope
    /// populates a per-class slot and later filters of the same class test
    /// the opened message instead.
    ///
    /// A filter uninstalled while this call is in flight is simply not
    /// delivered to; one filter's failure never stops the fan-out.
    pub fn notify_watchers(&self, envelope: &Envelope, is_p2p: bool) {
        let snapshot: Vec<(String, Arc<Filter>)> = {
            let watchers = self.watchers.read().unwrap();
            watchers
                .iter()
                .map(|(id, filter)| (id.clone(), Arc::clone(filter)))
                .collect()
        };

        // Per-dispatch open cache, one slot per key class; discarded when
        // this pass ends.
        let mut opened_sym: Option<ReceivedMessage> = None;
        let mut opened_asym: Option<ReceivedMessage> = None;

        for (id, watcher) in &snapshot {
            if is_p2p && !watcher.allow_p2p() {
                trace!(envelope = %envelope.hash(), filter = %id, "p2p messages not allowed");
                continue;
            }

            let opened = if watcher.expects_symmetric() {
                &mut opened_sym
            } else {
                &mut opened_asym
            };

            let message = match opened {
                Some(message) => watcher.match_message(message).then(|| message.clone()),
                None => {
                    if !watcher.match_envelope(envelope) {
                        trace!(envelope = %envelope.hash(), filter = %id, "does not match");
                        None
                    } else {
                        match watcher.open(envelope) {
                            Some(message) => {
                                trace!(envelope = %envelope.hash(), "decrypted");
                                *opened = Some(message.clone());
                                Some(message)
                            }
                            None => {
                                trace!(envelope = %envelope.hash(), filter = %id, "failed to open");
                                None
                            }
                        }
                    }
                }
            };

            let Some(message) = message else {
                continue;
            };

            if let Some(required) = watcher.src() {
                let signer_ok = message
                    .src
                    .as_ref()
                    .is_some_and(|src| signing_keys_equal(src, required));
                if !signer_ok {
                    trace!(envelope = %envelope.hash(), filter = %id, "signer mismatch");
                    continue;
                }
            }

            // An uninstall that raced this dispatch wins: lookup failure is
            // a non-match, not an error.
            if self.watchers.read().unwrap().contains_key(id) {
                watcher.trigger(message);
            } else {
                trace!(envelope = %envelope.hash(), filter = %id, "removed mid-dispatch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_protocol::{MessageParams, SentMessage};

    fn symmetric_filter(key: SymmetricKey, topics: Vec<Vec<u8>>) -> Filter {
        Filter::new(FilterKey::symmetric(key), None, topics, 0.0, false)
    }

    fn sealed_envelope(key: &SymmetricKey, topic: Topic, payload: &[u8]) -> Envelope {
        let params = MessageParams {
            src: None,
            dst: None,
            key_sym: Some(key.clone()),
            topic,
            ttl: 50,
            payload: payload.to_vec(),
            padding: None,
            pow_target: 0.0,
            pow_time: 0,
        };
        SentMessage::new(&params)
            .unwrap()
            .wrap(&params, 1_700_000_000)
            .unwrap()
    }

    fn received(envelope: &Envelope, filter: &Filter) -> ReceivedMessage {
        filter.open(envelope).expect("open must succeed")
    }

    #[test]
    fn test_install_get_uninstall() {
        let filters = Filters::new();
        let id = filters
            .install(symmetric_filter(SymmetricKey::generate(), vec![]))
            .unwrap();

        assert!(filters.get(&id).is_some());
        assert_eq!(filters.len(), 1);

        assert!(filters.uninstall(&id));
        assert!(filters.get(&id).is_none());
        // Idempotent: the second uninstall reports nothing removed
        assert!(!filters.uninstall(&id));
    }

    #[test]
    fn test_topic_wildcard_matches_everything() {
        let filter = symmetric_filter(SymmetricKey::generate(), vec![]);
        assert!(filter.match_topic(&Topic::from([0, 0, 0, 0])));
        assert!(filter.match_topic(&Topic::from([0xFF, 0xFF, 0xFF, 0xFF])));
        assert!(filter.match_topic(&Topic::from([1, 2, 3, 4])));
    }

    #[test]
    fn test_topic_exact_match() {
        let filter = symmetric_filter(
            SymmetricKey::generate(),
            vec![vec![0xAA, 0xBB, 0xCC, 0xDD]],
        );
        assert!(filter.match_topic(&Topic::from([0xAA, 0xBB, 0xCC, 0xDD])));
        assert!(!filter.match_topic(&Topic::from([0xAA, 0xBB, 0xCC, 0xDE])));
    }

    #[test]
    fn test_topic_any_of_several_patterns() {
        let filter = symmetric_filter(
            SymmetricKey::generate(),
            vec![vec![1, 1, 1, 1], vec![2, 2, 2, 2]],
        );
        assert!(filter.match_topic(&Topic::from([2, 2, 2, 2])));
        assert!(!filter.match_topic(&Topic::from([3, 3, 3, 3])));
    }

    #[test]
    fn test_topic_overlength_pattern_truncated() {
        let filter = symmetric_filter(
            SymmetricKey::generate(),
            vec![vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]],
        );
        assert!(filter.match_topic(&Topic::from([0xAA, 0xBB, 0xCC, 0xDD])));
    }

    #[test]
    fn test_topic_short_pattern_is_prefix_match() {
        let filter = symmetric_filter(SymmetricKey::generate(), vec![vec![0xAA, 0xBB]]);
        assert!(filter.match_topic(&Topic::from([0xAA, 0xBB, 0x00, 0x01])));
        assert!(!filter.match_topic(&Topic::from([0xAA, 0xCC, 0x00, 0x01])));
    }

    #[test]
    fn test_topic_empty_pattern_never_matches() {
        let filter = symmetric_filter(SymmetricKey::generate(), vec![vec![]]);
        assert!(!filter.match_topic(&Topic::from([0, 0, 0, 0])));
    }

    #[test]
    fn test_match_envelope_pow_gate_precedes_everything() {
        let key = SymmetricKey::generate();
        let envelope = sealed_envelope(&key, Topic::from([1, 2, 3, 4]), b"payload");

        // Same key, same topic, but an unreachable PoW floor: no match, so
        // the dispatch loop never even attempts decryption
        let strict = Filter::new(
            FilterKey::symmetric(key.clone()),
            None,
            vec![],
            f64::MAX,
            false,
        );
        assert!(!strict.match_envelope(&envelope));

        let lax = symmetric_filter(key, vec![]);
        assert!(lax.match_envelope(&envelope));
    }

    #[test]
    fn test_match_envelope_rejects_class_mismatch() {
        let key = SymmetricKey::generate();
        let envelope = sealed_envelope(&key, Topic::from([1, 2, 3, 4]), b"payload");

        let asym = Filter::new(
            FilterKey::asymmetric(Arc::new(KeyPair::generate())),
            None,
            vec![],
            0.0,
            false,
        );
        assert!(!asym.match_envelope(&envelope));
    }

    #[test]
    fn test_match_message_checks_fingerprint() {
        let key = SymmetricKey::generate();
        let filter = symmetric_filter(key.clone(), vec![]);
        let envelope = sealed_envelope(&key, Topic::from([1, 2, 3, 4]), b"payload");
        let message = received(&envelope, &filter);

        assert!(filter.match_message(&message));

        // A filter over a different key must not accept the cached message
        let other = symmetric_filter(SymmetricKey::generate(), vec![]);
        assert!(!other.match_message(&message));
    }

    #[test]
    fn test_trigger_is_idempotent_per_envelope() {
        let key = SymmetricKey::generate();
        let filter = symmetric_filter(key.clone(), vec![]);
        let envelope = sealed_envelope(&key, Topic::from([1, 2, 3, 4]), b"payload");
        let message = received(&envelope, &filter);

        filter.trigger(message.clone());
        filter.trigger(message);

        let drained = filter.retrieve();
        assert_eq!(drained.len(), 1);
        // The buffer was swapped out whole; nothing is left behind
        assert!(filter.retrieve().is_empty());
    }

    #[test]
    fn test_notify_watchers_delivers_to_matching_filter() {
        let filters = Filters::new();
        let key = SymmetricKey::generate();
        let id = filters
            .install(symmetric_filter(key.clone(), vec![vec![1, 2, 3, 4]]))
            .unwrap();

        let envelope = sealed_envelope(&key, Topic::from([1, 2, 3, 4]), b"hello");
        filters.notify_watchers(&envelope, false);

        let drained = filters.get(&id).unwrap().retrieve();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].payload, b"hello");
    }

    #[test]
    fn test_notify_watchers_shares_one_open_across_filters() {
        let filters = Filters::new();
        let key = SymmetricKey::generate();
        let id1 = filters.install(symmetric_filter(key.clone(), vec![])).unwrap();
        let id2 = filters.install(symmetric_filter(key.clone(), vec![])).unwrap();

        let envelope = sealed_envelope(&key, Topic::from([9, 9, 9, 9]), b"shared");
        filters.notify_watchers(&envelope, false);

        assert_eq!(filters.get(&id1).unwrap().retrieve().len(), 1);
        assert_eq!(filters.get(&id2).unwrap().retrieve().len(), 1);
    }

    #[test]
    fn test_notify_watchers_cross_class_is_silent_non_match() {
        let filters = Filters::new();
        let key = SymmetricKey::generate();
        let asym_id = filters
            .install(Filter::new(
                FilterKey::asymmetric(Arc::new(KeyPair::generate())),
                None,
                vec![],
                0.0,
                false,
            ))
            .unwrap();

        let envelope = sealed_envelope(&key, Topic::from([1, 2, 3, 4]), b"symmetric");
        filters.notify_watchers(&envelope, false);

        assert!(filters.get(&asym_id).unwrap().retrieve().is_empty());
    }

    #[test]
    fn test_notify_watchers_skips_p2p_unless_allowed() {
        let filters = Filters::new();
        let key = SymmetricKey::generate();
        let closed = filters.install(symmetric_filter(key.clone(), vec![])).unwrap();
        let open = filters
            .install(Filter::new(
                FilterKey::symmetric(key.clone()),
                None,
                vec![],
                0.0,
                true,
            ))
            .unwrap();

        let envelope = sealed_envelope(&key, Topic::from([1, 2, 3, 4]), b"direct");
        filters.notify_watchers(&envelope, true);

        assert!(filters.get(&closed).unwrap().retrieve().is_empty());
        assert_eq!(filters.get(&open).unwrap().retrieve().len(), 1);
    }

    #[test]
    fn test_notify_watchers_enforces_required_signer() {
        let filters = Filters::new();
        let key = SymmetricKey::generate();
        let signer = murmur_crypto::SigningKeyPair::generate();
        let stranger = murmur_crypto::SigningKeyPair::generate();

        let wants_signer = filters
            .install(Filter::new(
                FilterKey::symmetric(key.clone()),
                Some(signer.public_key()),
                vec![],
                0.0,
                false,
            ))
            .unwrap();
        let wants_stranger = filters
            .install(Filter::new(
                FilterKey::symmetric(key.clone()),
                Some(stranger.public_key()),
                vec![],
                0.0,
                false,
            ))
            .unwrap();

        let params = MessageParams {
            src: Some(murmur_crypto::SigningKeyPair::from_bytes(signer.as_bytes()).unwrap()),
            dst: None,
            key_sym: Some(key.clone()),
            topic: Topic::from([1, 2, 3, 4]),
            ttl: 50,
            payload: b"signed".to_vec(),
            padding: None,
            pow_target: 0.0,
            pow_time: 0,
        };
        let envelope = SentMessage::new(&params)
            .unwrap()
            .wrap(&params, 1_700_000_000)
            .unwrap();

        filters.notify_watchers(&envelope, false);

        assert_eq!(filters.get(&wants_signer).unwrap().retrieve().len(), 1);
        assert!(filters.get(&wants_stranger).unwrap().retrieve().is_empty());
    }

    #[test]
    fn test_notify_watchers_duplicate_envelope_buffers_once() {
        let filters = Filters::new();
        let key = SymmetricKey::generate();
        let id = filters.install(symmetric_filter(key.clone(), vec![])).unwrap();

        let envelope = sealed_envelope(&key, Topic::from([1, 2, 3, 4]), b"flooded");
        filters.notify_watchers(&envelope, false);
        filters.notify_watchers(&envelope, false);

        assert_eq!(filters.get(&id).unwrap().retrieve().len(), 1);
    }
}
