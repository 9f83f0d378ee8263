//! Hosted pub/sub relay backend.
//!
//! DESIGN
//! ======
//! Speaks the hosted relay's WebSocket conventions: the server opens with a
//! `relay:connection_established` frame whose `data` field is JSON-encoded
//! text carrying the socket id, the client subscribes to one private
//! channel with an auth signature fetched from the durable store, and the
//! server drives keepalive with `relay:ping` frames that must be answered
//! with `relay:pong`.
//!
//! Published events go out under their `client-` prefixed name on the
//! channel; inbound events are accepted under either the prefixed or bare
//! name, since the backend may echo either form. Inbound `data` may arrive
//! as a JSON object or as JSON-encoded text.
//!
//! LIFECYCLE
//! =========
//! Dial failures back off and redial like the raw-socket backend. A
//! completed dial whose handshake or subscription fails is retried once;
//! a second consecutive handshake failure reports `Dead`.

use std::time::Duration;

use async_trait::async_trait;
use events::Envelope;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use super::{
    BACKOFF_INITIAL, LinkEnd, LinkEvent, MAX_CONNECT_ATTEMPTS, Transport, TransportError,
    decode_app_event, next_backoff,
};
use crate::store::StoreClient;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECTION_ESTABLISHED: &str = "relay:connection_established";
const SUBSCRIBE: &str = "relay:subscribe";
const SUBSCRIPTION_SUCCEEDED: &str = "relay:subscription_succeeded";
const SUBSCRIPTION_ERROR: &str = "relay:subscription_error";
const PING: &str = "relay:ping";
const PONG: &str = "relay:pong";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// HANDLE
// =============================================================================

pub struct RelayTransport {
    tx: Option<mpsc::Sender<String>>,
    channel: String,
}

#[async_trait]
impl Transport for RelayTransport {
    async fn publish(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let Some(tx) = &self.tx else {
            return Err(TransportError::Closed);
        };
        let (name, body) = envelope.to_wire();
        let text = serde_json::json!({
            "event": format!("client-{name}"),
            "channel": self.channel,
            "data": body,
        })
        .to_string();
        match tx.try_send(text) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(TransportError::Congested),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

pub(crate) fn spawn(
    endpoint: &str,
    key: &str,
    channel: String,
    store: Option<StoreClient>,
) -> (Box<dyn Transport>, mpsc::Receiver<LinkEvent>) {
    let url = relay_url(endpoint, key);
    let (out_tx, out_rx, link_tx, link_rx) = super::channels();
    tokio::spawn(connection_task(url, channel.clone(), store, out_rx, link_tx));
    (Box::new(RelayTransport { tx: Some(out_tx), channel }), link_rx)
}

fn relay_url(endpoint: &str, key: &str) -> String {
    format!("{}/app/{key}?protocol=7", endpoint.trim_end_matches('/'))
}

// =============================================================================
// CONNECTION TASK
// =============================================================================

async fn connection_task(
    url: String,
    channel: String,
    store: Option<StoreClient>,
    mut out_rx: mpsc::Receiver<String>,
    link_tx: mpsc::Sender<LinkEvent>,
) {
    let mut attempts: u32 = 0;
    let mut handshake_failures: u32 = 0;
    let mut backoff = BACKOFF_INITIAL;
    let mut first = true;

    loop {
        match connect_async(&url).await {
            Ok((stream, _)) => {
                attempts = 0;
                match establish(stream, &channel, store.as_ref()).await {
                    Ok(ready) => {
                        handshake_failures = 0;
                        backoff = BACKOFF_INITIAL;
                        if link_tx.send(LinkEvent::Up { resumed: !first }).await.is_err() {
                            return;
                        }
                        first = false;

                        match run_link(ready, &mut out_rx, &link_tx).await {
                            LinkEnd::HostClosed => return,
                            LinkEnd::Lost(reason) => {
                                debug!(reason, "relay link lost");
                                if link_tx.send(LinkEvent::Down { reason }).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(reason) => {
                        // One retry, then degrade for good.
                        handshake_failures += 1;
                        if handshake_failures > 1 {
                            warn!(reason, "relay handshake failed twice, giving up");
                            let _ = link_tx.send(LinkEvent::Dead).await;
                            return;
                        }
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

/// Complete the relay handshake and channel subscription.
async fn establish(
    mut stream: WsStream,
    channel: &str,
    store: Option<&StoreClient>,
) -> Result<WsStream, String> {
    let socket_id = wait_connection_established(&mut stream).await?;

    // Private-channel signature comes from the durable store; without one
    // the channel is joined unsigned.
    let auth = match store {
        Some(store) => store
            .socket_auth(&socket_id, channel)
            .await
            .map_err(|error| format!("channel auth failed: {error}"))?,
        None => String::new(),
    };

    let subscribe = serde_json::json!({
        "event": SUBSCRIBE,
        "data": { "channel": channel, "auth": auth },
    });
    stream
        .send(Message::Text(subscribe.to_string().into()))
        .await
        .map_err(|error| format!("subscribe send failed: {error}"))?;

    wait_subscription_succeeded(&mut stream).await?;
    Ok(stream)
}

async fn wait_connection_established(stream: &mut WsStream) -> Result<String, String> {
    loop {
        let value = next_frame(stream).await?;
        let name = value.get("event").and_then(Value::as_str).unwrap_or_default();
        if name != CONNECTION_ESTABLISHED {
            continue;
        }
        // Hosted-relay convention: `data` is JSON-encoded text.
        let socket_id = value
            .get("data")
            .and_then(Value::as_str)
            .and_then(|text| serde_json::from_str::<Value>(text).ok())
            .and_then(|inner| inner.get("socket_id").and_then(Value::as_str).map(ToOwned::to_owned));
        return socket_id.ok_or_else(|| "handshake frame missing socket_id".to_owned());
    }
}

async fn wait_subscription_succeeded(stream: &mut WsStream) -> Result<(), String> {
    loop {
        let value = next_frame(stream).await?;
        match value.get("event").and_then(Value::as_str).unwrap_or_default() {
            SUBSCRIPTION_SUCCEEDED => return Ok(()),
            SUBSCRIPTION_ERROR => {
                return Err(format!("subscription rejected: {}", value.get("data").unwrap_or(&Value::Null)));
            }
            _ => {}
        }
    }
}

/// Next parsed text frame, bounded by the handshake timeout.
async fn next_frame(stream: &mut WsStream) -> Result<Value, String> {
    let fut = async {
        loop {
            let Some(message) = stream.next().await else {
                return Err("connection closed".to_owned());
            };
            let message = message.map_err(|error| format!("receive failed: {error}"))?;
            match message {
                Message::Text(text) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        return Ok(value);
                    }
                }
                Message::Close(_) => return Err("closed by server".to_owned()),
                _ => {}
            }
        }
    };
    tokio::time::timeout(HANDSHAKE_TIMEOUT, fut)
        .await
        .map_err(|_| "handshake timed out".to_owned())?
}

async fn run_link(
    stream: WsStream,
    out_rx: &mut mpsc::Receiver<String>,
    link_tx: &mpsc::Sender<LinkEvent>,
) -> LinkEnd {
    let (mut sink, mut source) = stream.split();

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
                match message {
                    Message::Text(text) => {
                        if let Some(reply) = handle_frame(&text, link_tx).await {
                            if let Err(error) = sink.send(Message::Text(reply.into())).await {
                                return LinkEnd::Lost(format!("send failed: {error}"));
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        if let Err(error) = sink.send(Message::Pong(payload)).await {
                            return LinkEnd::Lost(format!("send failed: {error}"));
                        }
                    }
                    Message::Close(_) => return LinkEnd::Lost("closed by server".to_owned()),
                    _ => {}
                }
            }
        }
    }
}

/// Process one inbound frame. Returns a reply frame when one is owed.
async fn handle_frame(text: &str, link_tx: &mpsc::Sender<LinkEvent>) -> Option<String> {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        debug!("dropped unparseable relay frame");
        return None;
    };
    let name = value.get("event").and_then(Value::as_str)?;

    if name == PING {
        return Some(serde_json::json!({ "event": PONG }).to_string());
    }
    if name.starts_with("relay:") {
        return None;
    }

    let payload = match value.get("data") {
        // The relay may double-encode application payloads too.
        Some(Value::String(text)) => serde_json::from_str::<Value>(text).ok()?,
        Some(other) => other.clone(),
        None => Value::Null,
    };
    if let Some(envelope) = decode_app_event(name, &payload) {
        let _ = link_tx.send(LinkEvent::Event(envelope)).await;
    }
    None
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
