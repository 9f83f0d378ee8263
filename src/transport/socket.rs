//! Raw duplex WebSocket backend.
//!
//! DESIGN
//! ======
//! One connection task owns the socket. Frames are JSON text of the form
//! `{"event": <name>, "data": <payload>}` in both directions. The server
//! keeps no session state, so every connection after the first reports
//! `Up { resumed: true }` and the engine rebroadcasts presence.
//!
//! Liveness is a protocol-level ping every [`HEARTBEAT_INTERVAL`]. If the
//! server has been silent for a whole interval when the next tick fires,
//! the link is declared stale and torn down. Reconnects back off
//! exponentially from [`BACKOFF_INITIAL`] to [`BACKOFF_CEILING`]; after
//! [`MAX_CONNECT_ATTEMPTS`] consecutive dial failures the task reports
//! `Dead` and exits.

use async_trait::async_trait;
use events::Envelope;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use super::{
    BACKOFF_INITIAL, HEARTBEAT_INTERVAL, LinkEnd, LinkEvent, MAX_CONNECT_ATTEMPTS, Transport,
    TransportError, decode_app_event, next_backoff,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// HANDLE
// =============================================================================

pub struct SocketTransport {
    tx: Option<mpsc::Sender<String>>,
}

#[async_trait]
impl Transport for SocketTransport {
    async fn publish(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let Some(tx) = &self.tx else {
            return Err(TransportError::Closed);
        };
        let (name, body) = envelope.to_wire();
        let text = serde_json::json!({ "event": name, "data": body }).to_string();
        match tx.try_send(text) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(TransportError::Congested),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    async fn close(&mut self) {
        // Dropping the sender ends the connection task's outbound stream.
        self.tx = None;
    }
}

pub(crate) fn spawn(url: String) -> (Box<dyn Transport>, mpsc::Receiver<LinkEvent>) {
    let (out_tx, out_rx, link_tx, link_rx) = super::channels();
    tokio::spawn(connection_task(url, out_rx, link_tx));
    (Box::new(SocketTransport { tx: Some(out_tx) }), link_rx)
}

// =============================================================================
// CONNECTION TASK
// =============================================================================

async fn connection_task(
    url: String,
    mut out_rx: mpsc::Receiver<String>,
    link_tx: mpsc::Sender<LinkEvent>,
) {
    let mut attempts: u32 = 0;
    let mut backoff = BACKOFF_INITIAL;
    let mut first = true;

    loop {
        match connect_async(&url).await {
            Ok((stream, _)) => {
                attempts = 0;
                backoff = BACKOFF_INITIAL;
                if link_tx.send(LinkEvent::Up { resumed: !first }).await.is_err() {
                    return;
                }
                first = false;

                match run_link(stream, &mut out_rx, &link_tx).await {
                    LinkEnd::HostClosed => return,
                    LinkEnd::Lost(reason) => {
                        debug!(reason, "socket link lost");
                        if link_tx.send(LinkEvent::Down { reason }).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(error) => {
                attempts += 1;
                if attempts >= MAX_CONNECT_ATTEMPTS {
                    let _ = link_tx.send(LinkEvent::Dead).await;
                    return;
                }
                let reason = format!("connect failed: {error}");
                if link_tx.send(LinkEvent::Down { reason }).await.is_err() {
                    return;
                }
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

/// Drive one established connection until it ends.
async fn run_link(
    stream: WsStream,
    out_rx: &mut mpsc::Receiver<String>,
    link_tx: &mpsc::Sender<LinkEvent>,
) -> LinkEnd {
    let (mut sink, mut source) = stream.split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut awaiting_reply = false;

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                let Some(text) = outbound else {
                    let _ = sink.send(Message::Close(None)).await;
                    return LinkEnd::HostClosed;
                };
                if let Err(error) = sink.send(Message::Text(text.into())).await {
                    return LinkEnd::Lost(format!("send failed: {error}"));
                }
            }
            inbound = source.next() => {
                let Some(message) = inbound else {
                    return LinkEnd::Lost("connection closed".to_owned());
                };
                let message = match message {
                    Ok(message) => message,
                    Err(error) => return LinkEnd::Lost(format!("receive failed: {error}")),
                };
                // Any traffic proves the server is alive.
                awaiting_reply = false;
                match message {
                    Message::Text(text) => forward_text(&text, link_tx).await,
                    Message::Ping(payload) => {
                        if let Err(error) = sink.send(Message::Pong(payload)).await {
                            return LinkEnd::Lost(format!("send failed: {error}"));
                        }
                    }
                    Message::Close(_) => return LinkEnd::Lost("closed by server".to_owned()),
                    _ => {}
                }
            }
            _ = heartbeat.tick() => {
                if awaiting_reply {
                    return LinkEnd::Lost("heartbeat timeout".to_owned());
                }
                if let Err(error) = sink.send(Message::Ping(Bytes::new())).await {
                    return LinkEnd::Lost(format!("send failed: {error}"));
                }
                awaiting_reply = true;
            }
        }
    }
}

async fn forward_text(text: &str, link_tx: &mpsc::Sender<LinkEvent>) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        debug!("dropped unparseable inbound frame");
        return;
    };
    let Some(name) = value.get("event").and_then(Value::as_str) else {
        return;
    };
    let payload = value.get("data").cloned().unwrap_or(Value::Null);
    if let Some(envelope) = decode_app_event(name, &payload) {
        let _ = link_tx.send(LinkEvent::Event(envelope)).await;
    }
}

#[cfg(test)]
#[path = "socket_test.rs"]
mod tests;
