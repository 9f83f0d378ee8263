use std::time::Duration;

use events::{Envelope, Event, PeerRef};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::spawn;
use crate::transport::LinkEvent;

const CHANNEL: &str = "private-copresence";

async fn next_link(rx: &mut tokio::sync::mpsc::Receiver<LinkEvent>, wait: Duration) -> LinkEvent {
    timeout(wait, rx.recv())
        .await
        .expect("link event receive timed out")
        .expect("link channel closed unexpectedly")
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let message = ws.next().await.expect("server recv").expect("server frame");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("frame json");
        }
    }
}

/// Run the server half of the relay handshake and return the subscribe frame.
async fn serve_handshake(ws: &mut WebSocketStream<TcpStream>) -> Value {
    let established = serde_json::json!({
        "event": "relay:connection_established",
        "data": "{\"socket_id\":\"81.17\"}",
    });
    ws.send(Message::Text(established.to_string().into()))
        .await
        .expect("send established");

    let subscribe = next_text(ws).await;

    let succeeded = serde_json::json!({
        "event": "relay:subscription_succeeded",
        "channel": CHANNEL,
    });
    ws.send(Message::Text(succeeded.to_string().into()))
        .await
        .expect("send succeeded");

    subscribe
}

#[tokio::test]
async fn handshake_subscribe_and_event_flow() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(stream).await.expect("handshake");

        let subscribe = serve_handshake(&mut ws).await;

        // Deliver an app event with JSON-encoded text data, the way the
        // hosted relay does.
        let inbound = serde_json::json!({
            "event": "client-new-message",
            "channel": CHANNEL,
            "data": "{\"user\":{\"id\":\"9\",\"name\":\"Mara\",\"color\":\"#d94b4b\"},\"id\":\"m1\",\"body\":\"hi\",\"created_at\":1000}",
        });
        ws.send(Message::Text(inbound.to_string().into()))
            .await
            .expect("send event");

        // Server-originated echoes arrive without the client- prefix; both
        // forms must decode.
        let bare = serde_json::json!({
            "event": "cursor-move",
            "channel": CHANNEL,
            "data": "{\"user\":{\"id\":\"9\",\"name\":\"Mara\",\"color\":\"#d94b4b\"},\"x\":1.0,\"y\":2.0,\"page\":\"/\"}",
        });
        ws.send(Message::Text(bare.to_string().into()))
            .await
            .expect("send bare event");

        let published = next_text(&mut ws).await;
        (subscribe, published)
    });

    let (mut transport, mut links) = spawn(&format!("ws://{addr}"), "test-key", CHANNEL.into(), None);

    assert!(matches!(
        next_link(&mut links, Duration::from_secs(2)).await,
        LinkEvent::Up { resumed: false }
    ));

    match next_link(&mut links, Duration::from_secs(2)).await {
        LinkEvent::Event(envelope) => {
            assert_eq!(envelope.sender.as_ref().map(|p| p.id.as_str()), Some("9"));
            assert!(matches!(envelope.event, Event::NewMessage(ref msg) if msg.body == "hi"));
        }
        other => panic!("expected Event, got {other:?}"),
    }

    match next_link(&mut links, Duration::from_secs(2)).await {
        LinkEvent::Event(envelope) => {
            assert_eq!(envelope.page.as_deref(), Some("/"));
            assert!(matches!(envelope.event, Event::CursorMove { .. }));
        }
        other => panic!("expected bare-form Event, got {other:?}"),
    }

    let outbound = Envelope {
        sender: Some(PeerRef { id: "local-1".into(), name: "Me".into(), color: "#2ec4b6".into() }),
        page: Some("/".into()),
        event: Event::CursorMove { x: 4.0, y: 8.0 },
    };
    transport.publish(&outbound).await.expect("publish");

    let (subscribe, published) = timeout(Duration::from_secs(2), server)
        .await
        .expect("server task timed out")
        .expect("server task");

    assert_eq!(subscribe["event"], "relay:subscribe");
    assert_eq!(subscribe["data"]["channel"], CHANNEL);
    // No store configured, so the channel is joined unsigned.
    assert_eq!(subscribe["data"]["auth"], "");

    assert_eq!(published["event"], "client-cursor-move");
    assert_eq!(published["channel"], CHANNEL);
    assert_eq!(published["data"]["x"], 4.0);
    assert_eq!(published["data"]["user"]["id"], "local-1");

    transport.close().await;
}

// Real time: a paused clock races real loopback I/O and can expire the
// test timeout before the websocket handshake completes.
#[tokio::test]
async fn second_handshake_failure_reports_dead() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        // Accept and drop two connections before the handshake frame.
        for _ in 0..2 {
            let (stream, _) = listener.accept().await.expect("accept");
            let ws = accept_async(stream).await.expect("upgrade");
            drop(ws);
        }
    });

    let (_transport, mut links) = spawn(&format!("ws://{addr}"), "test-key", CHANNEL.into(), None);

    assert!(matches!(
        next_link(&mut links, Duration::from_secs(60)).await,
        LinkEvent::Down { .. }
    ));
    assert!(matches!(
        next_link(&mut links, Duration::from_secs(60)).await,
        LinkEvent::Dead
    ));
    assert!(links.recv().await.is_none());
}

#[tokio::test]
async fn server_keepalive_is_answered() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(stream).await.expect("handshake");
        serve_handshake(&mut ws).await;

        let ping = serde_json::json!({ "event": "relay:ping" });
        ws.send(Message::Text(ping.to_string().into()))
            .await
            .expect("send ping");

        next_text(&mut ws).await
    });

    let (mut transport, mut links) = spawn(&format!("ws://{addr}"), "test-key", CHANNEL.into(), None);

    assert!(matches!(
        next_link(&mut links, Duration::from_secs(2)).await,
        LinkEvent::Up { resumed: false }
    ));

    let reply = timeout(Duration::from_secs(2), server)
        .await
        .expect("server task timed out")
        .expect("server task");
    assert_eq!(reply["event"], "relay:pong");

    transport.close().await;
}
