//! Configuration for a Murmur node.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use murmur_protocol::limits::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MIN_POW, MAX_MESSAGE_SIZE};

/// Default delivery poll interval in milliseconds.
const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Node configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Minimum PoW score required before an envelope is admitted.
    ///
    /// Broadcast posts below this target are rejected before the envelope
    /// is even built; direct-peer sends are exempt.
    pub min_pow: f64,

    /// Maximum accepted envelope size in bytes.
    pub max_message_size: u32,

    /// Interval between delivery polls for streaming subscribers.
    pub poll_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            min_pow: DEFAULT_MIN_POW,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl NodeConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum PoW score.
    pub fn with_min_pow(mut self, min_pow: f64) -> Self {
        self.min_pow = min_pow;
        self
    }

    /// Set the maximum accepted envelope size.
    pub fn with_max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the delivery poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value found.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.min_pow < 0.0 {
            return Err(format!("min_pow must be non-negative, got {}", self.min_pow));
        }
        if self.max_message_size > MAX_MESSAGE_SIZE {
            return Err(format!(
                "max_message_size {} exceeds hard limit {}",
                self.max_message_size, MAX_MESSAGE_SIZE
            ));
        }
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be non-zero".into());
        }
        Ok(())
    }
}
