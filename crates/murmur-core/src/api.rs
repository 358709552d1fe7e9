//! The public request API: subscribe, post, poll.
//!
//! Validates external requests, resolves key ids through the node's key
//! store, installs filters and builds outgoing envelopes. Field names on
//! the request and response types are the externally observable contract;
//! everything else in this module is free to change.
//!
//! ## Delivery
//!
//! Two drain styles over the same filter buffers:
//!
//! - **Polling**: [`PublicApi::new_message_filter`] installs a filter the
//!   caller drains explicitly with [`PublicApi::get_filter_messages`].
//! - **Streaming**: [`PublicApi::messages`] installs a filter and spawns a
//!   task that drains it on a fixed interval into a channel. The filter is
//!   uninstalled exactly once when the subscriber goes away, whichever way
//!   that happens.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use murmur_crypto::{Hash256, SigningKeyPair, SigningPublicKey, X25519PublicKey};
use murmur_protocol::{MessageParams, ReceivedMessage, SentMessage, Topic};

use crate::error::{CoreError, Result};
use crate::filter::{Filter, FilterKey};
use crate::keystore::KeyPair;
use crate::node::{unix_now, Murmur, NodeInfo};

/// Capacity of a streaming subscription channel.
const SUBSCRIPTION_BUFFER: usize = 64;

/// Filtering criteria for a subscription.
///
/// Exactly one of `sym_key_id` / `private_key_id` must be set. Topic
/// entries must be 1 to 4 bytes; symmetric subscriptions need at least one.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageCriteria {
    /// Id of a symmetric key in the node's key store.
    #[serde(rename = "symKeyID", skip_serializing_if = "Option::is_none")]
    pub sym_key_id: Option<String>,
    /// Id of a key pair in the node's key store.
    #[serde(rename = "privateKeyID", skip_serializing_if = "Option::is_none")]
    pub private_key_id: Option<String>,
    /// Require messages to be signed by this public key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_pub_key: Option<Vec<u8>>,
    /// Minimum PoW score this subscription accepts.
    pub min_pow: f64,
    /// Topic patterns; wildcard when empty (asymmetric only).
    pub topics: Vec<Vec<u8>>,
    /// Accept direct peer-to-peer messages.
    #[serde(rename = "allowP2P")]
    pub allow_p2p: bool,
}

/// A request to post a message onto the overlay.
///
/// Exactly one of `sym_key_id` / `public_key` must be set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostRequest {
    /// Id of a symmetric key in the node's key store.
    #[serde(rename = "symKeyID", skip_serializing_if = "Option::is_none")]
    pub sym_key_id: Option<String>,
    /// Recipient public key bytes for an asymmetric envelope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Vec<u8>>,
    /// Id of the key pair to sign with, if any.
    #[serde(rename = "signingKeyID", skip_serializing_if = "Option::is_none")]
    pub signing_key_id: Option<String>,
    /// Envelope time-to-live in seconds.
    pub ttl: u32,
    /// Routing topic.
    pub topic: Topic,
    /// Message payload.
    pub payload: Vec<u8>,
    /// Explicit padding bytes; random boundary padding when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padding: Option<Vec<u8>>,
    /// Time budget for PoW sealing, in seconds.
    pub pow_time: u32,
    /// PoW target the envelope must reach.
    pub pow_target: f64,
    /// Send point-to-point to this peer instead of broadcasting.
    ///
    /// Direct sends skip the node's PoW minimum.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_peer: Option<String>,
}

/// A message as delivered to a subscriber.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliveredMessage {
    /// Public key the message was signed with, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_pub_key: Option<Vec<u8>>,
    /// Time-to-live of the originating envelope in seconds.
    pub ttl: u32,
    /// Unix timestamp (seconds) the message was sent.
    pub sent_timestamp: u64,
    /// Routing topic.
    pub topic: Topic,
    /// Decrypted payload.
    pub payload: Vec<u8>,
    /// Padding that accompanied the payload.
    pub padding: Vec<u8>,
    /// PoW score of the originating envelope.
    pub pow: f64,
    /// Identity hash of the originating envelope.
    pub envelope_hash: Hash256,
    /// Recipient public key, for asymmetric envelopes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_pub_key: Option<Vec<u8>>,
}

impl From<ReceivedMessage> for DeliveredMessage {
    fn from(message: ReceivedMessage) -> Self {
        Self {
            signer_pub_key: message.src.map(|k| k.as_bytes().to_vec()),
            ttl: message.ttl,
            sent_timestamp: message.sent,
            topic: message.topic,
            payload: message.payload,
            padding: message.padding,
            pow: message.pow,
            envelope_hash: message.envelope_hash,
            recipient_pub_key: message.dst.map(|k| k.as_bytes().to_vec()),
        }
    }
}

/// A streaming subscription: messages arrive on a channel, drained from
/// the filter every poll interval.
pub struct MessageSubscription {
    id: String,
    receiver: mpsc::Receiver<DeliveredMessage>,
    handle: JoinHandle<()>,
}

impl MessageSubscription {
    /// The id of the underlying filter.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Receive the next delivered message.
    ///
    /// Returns `None` once the subscription has been torn down.
    pub async fn recv(&mut self) -> Option<DeliveredMessage> {
        self.receiver.recv().await
    }

    /// Cancel the subscription and wait for the filter to be uninstalled.
    pub async fn close(mut self) {
        self.receiver.close();
        if self.handle.await.is_err() {
            warn!(id = %self.id, "subscription poller panicked");
        }
    }
}

impl std::fmt::Debug for MessageSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// The public request surface over a node.
pub struct PublicApi {
    node: Arc<Murmur>,
    last_used: Mutex<HashMap<String, SystemTime>>,
}

impl PublicApi {
    /// Create the API front-end for a node.
    pub fn new(node: Arc<Murmur>) -> Self {
        Self {
            node,
            last_used: Mutex::new(HashMap::new()),
        }
    }

    // === Node tuning & diagnostics ===

    /// Diagnostic snapshot of the node.
    pub fn info(&self) -> NodeInfo {
        self.node.info()
    }

    /// Set the node's minimum PoW score.
    pub fn set_min_pow(&self, min_pow: f64) -> Result<()> {
        self.node.set_min_pow(min_pow)
    }

    /// Set the node's maximum accepted envelope size.
    pub fn set_max_message_size(&self, size: u32) -> Result<()> {
        self.node.set_max_message_size(size)
    }

    // === Key management ===

    /// Generate a fresh key pair; returns its id.
    pub fn new_key_pair(&self) -> Result<String> {
        self.node.key_store().new_key_pair()
    }

    /// Import a key pair from raw exchange and signing private key bytes.
    pub fn add_key_pair(&self, exchange: &[u8], signing: &[u8]) -> Result<String> {
        let exchange = murmur_crypto::X25519StaticPrivateKey::from_bytes(exchange)?;
        let signing = SigningKeyPair::from_bytes(signing)?;
        self.node.key_store().add_key_pair(KeyPair::new(exchange, signing))
    }

    /// Whether a key pair exists under the given id.
    pub fn has_key_pair(&self, id: &str) -> bool {
        self.node.key_store().has_key_pair(id)
    }

    /// Delete a key pair; returns whether one existed.
    pub fn delete_key_pair(&self, id: &str) -> bool {
        self.node.key_store().delete_key_pair(id)
    }

    /// The public exchange key others encrypt to, for a stored key pair.
    pub fn get_public_key(&self, id: &str) -> Result<Vec<u8>> {
        let pair = self
            .node
            .key_store()
            .get_key_pair(id)
            .ok_or_else(|| CoreError::KeyNotFound(id.into()))?;
        Ok(pair.public_exchange_key().as_bytes().to_vec())
    }

    /// Generate a fresh random symmetric key; returns its id.
    pub fn new_sym_key(&self) -> Result<String> {
        self.node.key_store().generate_sym_key()
    }

    /// Import raw symmetric key bytes; returns the new id.
    pub fn add_sym_key(&self, key: &[u8]) -> Result<String> {
        self.node.key_store().add_sym_key(key)
    }

    /// Derive a symmetric key from a password and store it.
    pub fn add_sym_key_from_password(&self, password: &str) -> Result<String> {
        self.node.key_store().add_sym_key_from_password(password)
    }

    /// Whether a symmetric key exists under the given id.
    pub fn has_sym_key(&self, id: &str) -> bool {
        self.node.key_store().has_sym_key(id)
    }

    /// Export the raw bytes of a stored symmetric key.
    pub fn get_sym_key(&self, id: &str) -> Result<Vec<u8>> {
        let key = self
            .node
            .key_store()
            .get_sym_key(id)
            .ok_or_else(|| CoreError::KeyNotFound(id.into()))?;
        Ok(key.as_bytes().to_vec())
    }

    /// Delete a symmetric key; returns whether one existed.
    pub fn delete_sym_key(&self, id: &str) -> bool {
        self.node.key_store().delete_sym_key(id)
    }

    // === Subscriptions ===

    /// Install a filter for explicit polling; returns its id.
    pub fn new_message_filter(&self, criteria: MessageCriteria) -> Result<String> {
        let filter = self.build_filter(&criteria)?;
        let id = self.node.subscribe(filter)?;
        self.touch(&id);
        Ok(id)
    }

    /// Drain the messages a filter matched since the previous poll.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::FilterNotFound` for an unknown id.
    pub fn get_filter_messages(&self, id: &str) -> Result<Vec<DeliveredMessage>> {
        let filter = self
            .node
            .get_filter(id)
            .ok_or_else(|| CoreError::FilterNotFound(id.into()))?;
        self.touch(id);
        Ok(filter
            .retrieve()
            .into_iter()
            .map(DeliveredMessage::from)
            .collect())
    }

    /// Remove a polling filter; returns whether one existed.
    pub fn delete_message_filter(&self, id: &str) -> bool {
        self.last_used.lock().unwrap().remove(id);
        self.node.unsubscribe(id)
    }

    /// When a polling filter was last created or drained.
    ///
    /// The surrounding node uses this to evict filters whose clients have
    /// gone away without unsubscribing.
    pub fn last_polled(&self, id: &str) -> Option<SystemTime> {
        self.last_used.lock().unwrap().get(id).copied()
    }

    /// Install a filter and stream its matches over a channel.
    ///
    /// A spawned task drains the filter every poll interval and forwards
    /// each message to the subscription. When the subscriber is dropped or
    /// [`MessageSubscription::close`]d, the task uninstalls the filter on
    /// its single exit path - exactly once, whichever way the loop ends.
    pub fn messages(&self, criteria: MessageCriteria) -> Result<MessageSubscription> {
        let filter = self.build_filter(&criteria)?;
        let id = self.node.subscribe(filter)?;

        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let node = Arc::clone(&self.node);
        let poll_interval = self.node.poll_interval();
        let filter_id = id.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            'deliver: loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // The filter disappearing out from under us (e.g.
                        // an explicit unsubscribe) also ends delivery
                        let Some(filter) = node.get_filter(&filter_id) else {
                            break 'deliver;
                        };
                        for message in filter.retrieve() {
                            if sender.send(DeliveredMessage::from(message)).await.is_err() {
                                break 'deliver;
                            }
                        }
                    }
                    _ = sender.closed() => break 'deliver,
                }
            }
            node.unsubscribe(&filter_id);
            debug!(id = %filter_id, "subscription closed");
        });

        Ok(MessageSubscription {
            id,
            receiver,
            handle,
        })
    }

    // === Posting ===

    /// Encrypt, seal and send a message; returns the envelope hash.
    ///
    /// With a `target_peer` the envelope is sent point-to-point and the
    /// node's PoW minimum does not apply. Otherwise the requested PoW
    /// target is checked against the node minimum before the envelope is
    /// even built, then the envelope is broadcast.
    pub fn post(&self, request: PostRequest) -> Result<Hash256> {
        let sym_given = given(&request.sym_key_id);
        let pub_given = request.public_key.as_ref().is_some_and(|k| !k.is_empty());
        if sym_given == pub_given {
            return Err(CoreError::SymAsym);
        }

        // Reject an underpowered broadcast before doing any work
        if request.target_peer.is_none() && request.pow_target < self.node.min_pow() {
            return Err(CoreError::TooLowPow);
        }

        let src = match &request.signing_key_id {
            Some(id) if !id.is_empty() => {
                let pair = self
                    .node
                    .key_store()
                    .get_key_pair(id)
                    .ok_or_else(|| CoreError::KeyNotFound(id.clone()))?;
                // A private copy for the lifetime of this request only
                Some(SigningKeyPair::from_bytes(pair.signing().as_bytes())?)
            }
            _ => None,
        };

        let (key_sym, dst) = if sym_given {
            if request.topic == Topic::default() {
                return Err(CoreError::NoTopics);
            }
            let id = request.sym_key_id.as_deref().unwrap_or_default();
            let key = self
                .node
                .key_store()
                .get_sym_key(id)
                .ok_or_else(|| CoreError::KeyNotFound(id.into()))?;
            (Some(key), None)
        } else {
            let bytes = request.public_key.as_deref().unwrap_or_default();
            let key = X25519PublicKey::from_bytes(bytes)
                .map_err(|_| CoreError::InvalidPublicKey)?;
            if !key.is_valid() {
                return Err(CoreError::InvalidPublicKey);
            }
            (None, Some(key))
        };

        let params = MessageParams {
            src,
            dst,
            key_sym,
            topic: request.topic,
            ttl: if request.ttl == 0 {
                murmur_protocol::limits::DEFAULT_TTL_SECS
            } else {
                request.ttl
            },
            payload: request.payload,
            padding: request.padding,
            pow_target: request.pow_target,
            pow_time: request.pow_time,
        };

        let envelope = SentMessage::new(&params)?.wrap(&params, unix_now())?;
        let hash = envelope.hash();

        match &request.target_peer {
            Some(peer) => self.node.send_p2p(peer, &envelope)?,
            None => self.node.broadcast(&envelope)?,
        }

        debug!(envelope = %hash, direct = request.target_peer.is_some(), "message posted");
        Ok(hash)
    }

    // === Internals ===

    fn touch(&self, id: &str) {
        self.last_used
            .lock()
            .unwrap()
            .insert(id.to_string(), SystemTime::now());
    }

    /// Validate subscription criteria and build the filter.
    fn build_filter(&self, criteria: &MessageCriteria) -> Result<Filter> {
        let sym_given = given(&criteria.sym_key_id);
        let asym_given = given(&criteria.private_key_id);
        if sym_given == asym_given {
            return Err(CoreError::SymAsym);
        }

        let src = match &criteria.signer_pub_key {
            Some(bytes) => {
                let key = SigningPublicKey::from_bytes(bytes)
                    .map_err(|_| CoreError::InvalidSigningPubKey)?;
                if !key.is_valid() {
                    return Err(CoreError::InvalidSigningPubKey);
                }
                Some(key)
            }
            None => None,
        };

        for (index, topic) in criteria.topics.iter().enumerate() {
            if topic.is_empty() || topic.len() > Topic::SIZE {
                return Err(CoreError::BadTopic {
                    index,
                    len: topic.len(),
                });
            }
        }

        let key = if sym_given {
            if criteria.topics.is_empty() {
                // A symmetric wildcard would match everything under the
                // key; disallowed
                return Err(CoreError::NoTopics);
            }
            let id = criteria.sym_key_id.as_deref().unwrap_or_default();
            let key = self
                .node
                .key_store()
                .get_sym_key(id)
                .ok_or_else(|| CoreError::KeyNotFound(id.into()))?;
            FilterKey::symmetric(key)
        } else {
            let id = criteria.private_key_id.as_deref().unwrap_or_default();
            let pair = self
                .node
                .key_store()
                .get_key_pair(id)
                .ok_or_else(|| CoreError::KeyNotFound(id.into()))?;
            FilterKey::asymmetric(pair)
        };

        Ok(Filter::new(
            key,
            src,
            criteria.topics.clone(),
            criteria.min_pow,
            criteria.allow_p2p,
        ))
    }
}

impl std::fmt::Debug for PublicApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicApi").finish_non_exhaustive()
    }
}

fn given(id: &Option<String>) -> bool {
    id.as_deref().is_some_and(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::node::NullTransport;

    fn api() -> PublicApi {
        let node = Arc::new(Murmur::new(NodeConfig::default(), Box::new(NullTransport)));
        PublicApi::new(node)
    }

    fn sym_criteria(api: &PublicApi) -> MessageCriteria {
        let key_id = api.new_sym_key().unwrap();
        MessageCriteria {
            sym_key_id: Some(key_id),
            topics: vec![vec![1, 2, 3, 4]],
            ..Default::default()
        }
    }

    #[test]
    fn test_subscribe_requires_exactly_one_key_class() {
        let api = api();

        // Neither key
        let result = api.new_message_filter(MessageCriteria::default());
        assert!(matches!(result, Err(CoreError::SymAsym)));

        // Both keys
        let sym = api.new_sym_key().unwrap();
        let pair = api.new_key_pair().unwrap();
        let result = api.new_message_filter(MessageCriteria {
            sym_key_id: Some(sym),
            private_key_id: Some(pair),
            topics: vec![vec![1, 2, 3, 4]],
            ..Default::default()
        });
        assert!(matches!(result, Err(CoreError::SymAsym)));
    }

    #[test]
    fn test_subscribe_symmetric_requires_topic() {
        let api = api();
        let key_id = api.new_sym_key().unwrap();
        let result = api.new_message_filter(MessageCriteria {
            sym_key_id: Some(key_id),
            ..Default::default()
        });
        assert!(matches!(result, Err(CoreError::NoTopics)));
    }

    #[test]
    fn test_subscribe_asymmetric_allows_wildcard() {
        let api = api();
        let pair = api.new_key_pair().unwrap();
        let id = api
            .new_message_filter(MessageCriteria {
                private_key_id: Some(pair),
                ..Default::default()
            })
            .unwrap();
        assert!(api.last_polled(&id).is_some());
    }

    #[test]
    fn test_subscribe_rejects_bad_topics() {
        let api = api();
        let mut criteria = sym_criteria(&api);

        criteria.topics = vec![vec![]];
        assert!(matches!(
            api.new_message_filter(criteria.clone()),
            Err(CoreError::BadTopic { index: 0, len: 0 })
        ));

        criteria.topics = vec![vec![1, 2, 3, 4], vec![1, 2, 3, 4, 5]];
        assert!(matches!(
            api.new_message_filter(criteria),
            Err(CoreError::BadTopic { index: 1, len: 5 })
        ));
    }

    #[test]
    fn test_subscribe_rejects_unknown_key_id() {
        let api = api();
        let result = api.new_message_filter(MessageCriteria {
            sym_key_id: Some("no-such-key".into()),
            topics: vec![vec![1, 2, 3, 4]],
            ..Default::default()
        });
        assert!(matches!(result, Err(CoreError::KeyNotFound(_))));
    }

    #[test]
    fn test_subscribe_rejects_malformed_signer_key() {
        let api = api();
        let mut criteria = sym_criteria(&api);
        criteria.signer_pub_key = Some(vec![0u8; 7]);
        assert!(matches!(
            api.new_message_filter(criteria),
            Err(CoreError::InvalidSigningPubKey)
        ));
    }

    #[test]
    fn test_get_filter_messages_unknown_filter() {
        let api = api();
        assert!(matches!(
            api.get_filter_messages("missing"),
            Err(CoreError::FilterNotFound(_))
        ));
    }

    #[test]
    fn test_delete_message_filter_idempotent() {
        let api = api();
        let id = api.new_message_filter(sym_criteria(&api)).unwrap();
        assert!(api.delete_message_filter(&id));
        assert!(!api.delete_message_filter(&id));
        assert!(api.last_polled(&id).is_none());
    }

    #[test]
    fn test_post_requires_exactly_one_key_class() {
        let api = api();
        assert!(matches!(
            api.post(PostRequest::default()),
            Err(CoreError::SymAsym)
        ));
    }

    #[test]
    fn test_post_symmetric_requires_topic() {
        let api = api();
        api.set_min_pow(0.0).unwrap();
        let key_id = api.new_sym_key().unwrap();
        let result = api.post(PostRequest {
            sym_key_id: Some(key_id),
            ttl: 50,
            pow_time: 1,
            ..Default::default()
        });
        assert!(matches!(result, Err(CoreError::NoTopics)));
    }

    #[test]
    fn test_post_broadcast_rejects_low_pow_target() {
        let api = api();
        api.set_min_pow(10.0).unwrap();
        let key_id = api.new_sym_key().unwrap();
        let result = api.post(PostRequest {
            sym_key_id: Some(key_id),
            topic: Topic::from([1, 2, 3, 4]),
            ttl: 50,
            pow_target: 0.5,
            pow_time: 1,
            ..Default::default()
        });
        assert!(matches!(result, Err(CoreError::TooLowPow)));
    }

    #[test]
    fn test_post_direct_send_skips_pow_minimum() {
        let api = api();
        api.set_min_pow(10.0).unwrap();
        let key_id = api.new_sym_key().unwrap();
        let hash = api
            .post(PostRequest {
                sym_key_id: Some(key_id),
                topic: Topic::from([1, 2, 3, 4]),
                ttl: 50,
                pow_target: 0.0,
                pow_time: 0,
                target_peer: Some("peer-1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_ne!(hash, Hash256::default());
    }

    #[test]
    fn test_post_rejects_malformed_public_key() {
        let api = api();
        api.set_min_pow(0.0).unwrap();
        let result = api.post(PostRequest {
            public_key: Some(vec![1, 2, 3]),
            ttl: 50,
            pow_time: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(CoreError::InvalidPublicKey)));
    }

    #[test]
    fn test_post_rejects_degenerate_public_key() {
        let api = api();
        api.set_min_pow(0.0).unwrap();
        let result = api.post(PostRequest {
            public_key: Some(vec![0u8; 32]),
            ttl: 50,
            pow_time: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(CoreError::InvalidPublicKey)));
    }

    #[test]
    fn test_criteria_json_field_names() {
        let criteria = MessageCriteria {
            sym_key_id: Some("abc".into()),
            min_pow: 0.5,
            topics: vec![vec![1, 2, 3, 4]],
            allow_p2p: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&criteria).unwrap();
        assert!(json.contains("\"symKeyID\""));
        assert!(json.contains("\"minPow\""));
        assert!(json.contains("\"allowP2P\""));
    }
}
