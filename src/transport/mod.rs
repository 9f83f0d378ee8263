//! Realtime transport backends.
//!
//! DESIGN
//! ======
//! One backend is selected at startup and never changed: a hosted pub/sub
//! relay channel ([`relay`]) or a raw duplex WebSocket ([`socket`]). Both
//! present the same surface:
//!
//! - a [`Transport`] handle the engine publishes through, and
//! - a stream of [`LinkEvent`]s: decoded inbound envelopes plus link
//!   up/down/dead transitions.
//!
//! Each backend runs one connection task that owns the socket. Outbound
//! text reaches it through a bounded channel; publishing is best-effort and
//! never blocks the engine. The durable store is the persistence path, so a
//! lost publish costs nothing but liveness.
//!
//! LIFECYCLE
//! =========
//! 1. [`connect`] spawns the connection task and returns immediately.
//! 2. The task dials, emits `Up`, and forwards decoded envelopes.
//! 3. On loss it emits `Down` and redials with exponential backoff.
//! 4. After `MAX_CONNECT_ATTEMPTS` consecutive failures it emits `Dead`
//!    and exits; the widget stays up in a chat-disabled state.

use std::time::Duration;

use async_trait::async_trait;
use events::{Envelope, ProtocolError};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::TransportConfig;
use crate::store::StoreClient;

pub mod relay;
pub mod socket;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
pub const BACKOFF_CEILING: Duration = Duration::from_secs(30);
pub const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Depth of the outbound and link-event channels.
const CHANNEL_DEPTH: usize = 256;

// =============================================================================
// SURFACE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection task has exited; nothing can be sent until reload.
    #[error("transport closed")]
    Closed,
    /// The outbound channel is full. The frame is dropped, not queued.
    #[error("transport congested")]
    Congested,
}

/// What the connection task reports back to the engine.
#[derive(Debug)]
pub enum LinkEvent {
    /// A decoded inbound envelope, in delivery order.
    Event(Envelope),
    /// Connected. `resumed` is true for every connection after the first;
    /// the engine must rebroadcast presence since the server keeps no
    /// session state.
    Up { resumed: bool },
    /// Connection lost; the task is backing off and redialing.
    Down { reason: String },
    /// Reconnect attempts exhausted or the handshake failed for good.
    Dead,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Best-effort publish. A full queue or a dead link returns an error;
    /// callers log and move on.
    async fn publish(&self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Stop the connection task. Publishing afterwards returns
    /// [`TransportError::Closed`].
    async fn close(&mut self);
}

/// Spawn the backend selected by `config`. Returns the publish handle and
/// the link-event stream. Never blocks on the network.
#[must_use]
pub fn connect(
    config: TransportConfig,
    store: Option<StoreClient>,
) -> (Box<dyn Transport>, mpsc::Receiver<LinkEvent>) {
    match config {
        TransportConfig::Relay { endpoint, key, channel } => {
            relay::spawn(&endpoint, &key, channel, store)
        }
        TransportConfig::Socket { url } => socket::spawn(url),
    }
}

// =============================================================================
// SHARED PLUMBING
// =============================================================================

/// Why a connection ended, as seen by the backend loop.
#[derive(Debug)]
pub(crate) enum LinkEnd {
    /// The engine dropped or closed the handle. Stop redialing.
    HostClosed,
    /// The link failed; redial.
    Lost(String),
}

pub(crate) fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(BACKOFF_CEILING)
}

/// Decode one application event. Unknown names return `None` so callers can
/// fall through to backend system events; malformed payloads are dropped
/// here with a log line and never reach the router.
pub(crate) fn decode_app_event(name: &str, payload: &Value) -> Option<Envelope> {
    match Envelope::parse(name, payload) {
        Ok(envelope) => Some(envelope),
        Err(ProtocolError::UnknownEvent(_)) => None,
        Err(error) => {
            debug!(event = name, %error, "dropped malformed inbound event");
            None
        }
    }
}

pub(crate) fn channels() -> (
    mpsc::Sender<String>,
    mpsc::Receiver<String>,
    mpsc::Sender<LinkEvent>,
    mpsc::Receiver<LinkEvent>,
) {
    let (out_tx, out_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (link_tx, link_rx) = mpsc::channel(CHANNEL_DEPTH);
    (out_tx, out_rx, link_tx, link_rx)
}
