//! Murmur node daemon.
//!
//! A standalone shell around the murmur-core engine. Until a peer transport
//! is wired in, outgoing envelopes loop back into the local dispatch path,
//! which is what a single node does with its own traffic anyway.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

use murmur_core::{Murmur, NodeConfig, PublicApi, Transport};
use murmur_protocol::limits::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MIN_POW};
use murmur_protocol::Envelope;

/// Murmur overlay node
///
/// A dark, topic-routed messaging node: envelopes are opaque and
/// encrypted, proof-of-work gates admission, and recipients are identified
/// only by their ability to decrypt.
#[derive(Parser, Debug)]
#[command(name = "murmur-node")]
#[command(version, about, long_about = None)]
struct Args {
    /// Minimum PoW score required of broadcast envelopes
    #[arg(long, env = "MURMUR_MIN_POW", default_value_t = DEFAULT_MIN_POW)]
    min_pow: f64,

    /// Maximum accepted envelope size in bytes
    #[arg(long, env = "MURMUR_MAX_MESSAGE_SIZE", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: u32,

    /// Delivery poll interval in milliseconds
    #[arg(long, env = "MURMUR_POLL_INTERVAL_MS", default_value = "250")]
    poll_interval_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MURMUR_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (plain, json)
    #[arg(long, env = "MURMUR_LOG_FORMAT", default_value = "plain")]
    log_format: String,
}

fn setup_logging(log_level: &str, log_format: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    match log_format.to_lowercase().as_str() {
        "json" => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .json()
                .flatten_event(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set subscriber")?;
        }
        _ => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_target(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set subscriber")?;
        }
    }

    Ok(())
}

/// Transport that feeds outgoing envelopes back into the local dispatch
/// queue. Direct sends are treated the same way: this node is the only
/// peer it knows.
struct LoopbackTransport {
    queue: mpsc::UnboundedSender<(Envelope, bool)>,
}

impl Transport for LoopbackTransport {
    fn send(&self, peer: &str, envelope: &Envelope) -> murmur_core::Result<()> {
        self.queue
            .send((envelope.clone(), true))
            .map_err(|_| murmur_core::CoreError::Transport(format!("peer {peer} unreachable")))
    }

    fn broadcast(&self, envelope: &Envelope) -> murmur_core::Result<()> {
        self.queue
            .send((envelope.clone(), false))
            .map_err(|_| murmur_core::CoreError::Transport("dispatch queue closed".into()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level, &args.log_format)?;

    let config = NodeConfig::default()
        .with_min_pow(args.min_pow)
        .with_max_message_size(args.max_message_size)
        .with_poll_interval(std::time::Duration::from_millis(args.poll_interval_ms));
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let (queue, mut inbound) = mpsc::unbounded_channel();
    let node = Arc::new(Murmur::new(config, Box::new(LoopbackTransport { queue })));
    let api = PublicApi::new(node.clone());

    let info = api.info();
    info!(
        min_pow = info.min_pow,
        max_message_size = info.max_message_size,
        "murmur node started"
    );

    let dispatcher = {
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            while let Some((envelope, is_p2p)) = inbound.recv().await {
                if let Err(e) = node.handle_envelope(&envelope, is_p2p) {
                    warn!(error = %e, "envelope rejected");
                }
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutting down");
    dispatcher.abort();

    Ok(())
}
