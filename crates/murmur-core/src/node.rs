//! The node host: filters, key store, tunables and the transport port.
//!
//! `Murmur` owns the per-node state the request API and the dispatch path
//! share. It performs envelope admission - size, expiry and the node-wide
//! PoW minimum - before fanning envelopes out to the filter registry, and
//! forwards outgoing envelopes to the external transport.
//!
//! The transport itself (peer management, flooding, relay) lives outside
//! this crate; [`Transport`] is the narrow synchronous port the core needs.

use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, trace};

use murmur_protocol::limits::{EXPIRY_SLACK_SECS, MAX_MESSAGE_SIZE};
use murmur_protocol::Envelope;

use crate::config::NodeConfig;
use crate::error::{CoreError, Result};
use crate::filter::{Filter, Filters};
use crate::keystore::KeyStore;

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The outbound port into the external transport layer.
///
/// Both calls are fire-and-forget: failures are reported synchronously and
/// never retried here. Implementations must not block on network I/O.
pub trait Transport: Send + Sync {
    /// Send an envelope to one specific peer.
    fn send(&self, peer: &str, envelope: &Envelope) -> Result<()>;

    /// Flood an envelope to all connected peers.
    fn broadcast(&self, envelope: &Envelope) -> Result<()>;
}

/// Diagnostic snapshot of the node.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Minimum accepted PoW score.
    pub min_pow: f64,
    /// Maximum accepted envelope size in bytes.
    pub max_message_size: u32,
    /// Number of installed filters.
    pub filters: usize,
}

/// Per-node state: the filter registry, key store and tunables.
pub struct Murmur {
    filters: Filters,
    key_store: KeyStore,
    min_pow: RwLock<f64>,
    max_message_size: RwLock<u32>,
    poll_interval: Duration,
    transport: Box<dyn Transport>,
}

impl Murmur {
    /// Create a node from a configuration and a transport implementation.
    pub fn new(config: NodeConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            filters: Filters::new(),
            key_store: KeyStore::new(),
            min_pow: RwLock::new(config.min_pow),
            max_message_size: RwLock::new(config.max_message_size),
            poll_interval: config.poll_interval,
            transport,
        }
    }

    /// The filter registry.
    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    /// The key store.
    pub fn key_store(&self) -> &KeyStore {
        &self.key_store
    }

    /// The node's current minimum PoW score.
    pub fn min_pow(&self) -> f64 {
        *self.min_pow.read().unwrap()
    }

    /// Change the minimum PoW score.
    ///
    /// # Errors
    ///
    /// Rejects negative values.
    pub fn set_min_pow(&self, min_pow: f64) -> Result<()> {
        if min_pow < 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "min_pow must be non-negative, got {min_pow}"
            )));
        }
        *self.min_pow.write().unwrap() = min_pow;
        debug!(min_pow, "minimum PoW updated");
        Ok(())
    }

    /// The node's current maximum accepted envelope size.
    pub fn max_message_size(&self) -> u32 {
        *self.max_message_size.read().unwrap()
    }

    /// Change the maximum accepted envelope size.
    ///
    /// # Errors
    ///
    /// Rejects sizes above the protocol hard limit.
    pub fn set_max_message_size(&self, size: u32) -> Result<()> {
        if size > MAX_MESSAGE_SIZE {
            return Err(CoreError::InvalidConfig(format!(
                "max_message_size {size} exceeds hard limit {MAX_MESSAGE_SIZE}"
            )));
        }
        *self.max_message_size.write().unwrap() = size;
        debug!(size, "maximum message size updated");
        Ok(())
    }

    /// Delivery poll interval for streaming subscribers.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Install a filter; returns its id.
    pub fn subscribe(&self, filter: Filter) -> Result<String> {
        self.filters.install(filter)
    }

    /// Remove a filter; returns whether one existed.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.filters.uninstall(id)
    }

    /// Look up a filter by id.
    pub fn get_filter(&self, id: &str) -> Option<Arc<Filter>> {
        self.filters.get(id)
    }

    /// Admit an inbound envelope and dispatch it to matching filters.
    ///
    /// Called by the transport layer once per newly received, not-yet-seen
    /// envelope. Returns whether the envelope was dispatched: expired or
    /// underpowered envelopes are dropped quietly (`Ok(false)`), since
    /// they are routine network conditions, not caller errors. Direct
    /// peer-to-peer envelopes skip the PoW minimum.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::OversizedMessage` for envelopes above the
    /// configured size limit.
    pub fn handle_envelope(&self, envelope: &Envelope, is_p2p: bool) -> Result<bool> {
        let size = envelope.size();
        if size > self.max_message_size() as usize {
            return Err(CoreError::OversizedMessage {
                size,
                max: self.max_message_size() as usize,
            });
        }

        let now = unix_now();
        if envelope.expiry.saturating_add(EXPIRY_SLACK_SECS) < now {
            trace!(envelope = %envelope.hash(), expiry = envelope.expiry, "expired, dropped");
            return Ok(false);
        }

        if !is_p2p && envelope.pow() < self.min_pow() {
            trace!(
                envelope = %envelope.hash(),
                pow = envelope.pow(),
                min_pow = self.min_pow(),
                "PoW below node minimum, dropped"
            );
            return Ok(false);
        }

        self.filters.notify_watchers(envelope, is_p2p);
        Ok(true)
    }

    /// Send an envelope to one specific peer.
    pub fn send_p2p(&self, peer: &str, envelope: &Envelope) -> Result<()> {
        self.transport.send(peer, envelope)
    }

    /// Flood an envelope to all connected peers.
    pub fn broadcast(&self, envelope: &Envelope) -> Result<()> {
        self.transport.broadcast(envelope)
    }

    /// Diagnostic snapshot.
    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            min_pow: self.min_pow(),
            max_message_size: self.max_message_size(),
            filters: self.filters.len(),
        }
    }
}

impl std::fmt::Debug for Murmur {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Murmur")
            .field("min_pow", &self.min_pow())
            .field("max_message_size", &self.max_message_size())
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}

/// A transport that drops everything; for nodes that only receive, and for
/// tests.
#[derive(Default, Debug, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&self, _peer: &str, _envelope: &Envelope) -> Result<()> {
        Ok(())
    }

    fn broadcast(&self, _envelope: &Envelope) -> Result<()> {
        Ok(())
    }
}
