//! # murmur-core
//!
//! The admission, decryption-matching and subscription-delivery engine of
//! the Murmur overlay.
//!
//! Every envelope a node receives passes through the [`Filters`] registry,
//! which decides which locally-registered interests it satisfies, decrypts
//! it at most once per key class, deduplicates it, and buffers it until the
//! subscriber drains it. The [`PublicApi`] front-end validates subscribe
//! and post requests, resolves key ids through the [`KeyStore`], and runs
//! the polling delivery loops.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use murmur_core::{Murmur, NodeConfig, PublicApi};
//! use murmur_core::api::{MessageCriteria, PostRequest};
//!
//! let node = Arc::new(Murmur::new(NodeConfig::default(), transport));
//! let api = PublicApi::new(node.clone());
//!
//! let key_id = api.new_sym_key()?;
//! let filter_id = api.new_message_filter(MessageCriteria {
//!     sym_key_id: Some(key_id.clone()),
//!     topics: vec![vec![0x4d, 0x52, 0x4d, 0x52]],
//!     ..Default::default()
//! })?;
//!
//! // ... envelopes arrive via node.handle_envelope(...) ...
//!
//! for message in api.get_filter_messages(&filter_id)? {
//!     println!("payload: {:?}", message.payload);
//! }
//! ```
//!
//! ## Concurrency
//!
//! The registry lock only guards membership; dispatch snapshots the watcher
//! set and decrypts outside every lock. Each filter owns the lock on its
//! pending buffer, so one subscriber draining never blocks another being
//! triggered.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod error;
pub mod filter;
pub mod keystore;
pub mod node;

pub use api::{DeliveredMessage, MessageCriteria, MessageSubscription, PostRequest, PublicApi};
pub use config::NodeConfig;
pub use error::{CoreError, Result};
pub use filter::{Filter, FilterKey, Filters};
pub use keystore::{KeyPair, KeyStore};
pub use node::{Murmur, NodeInfo, Transport};

// Re-export commonly used types
pub use murmur_crypto::Hash256;
pub use murmur_protocol::{Envelope, ReceivedMessage, Topic};
