use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use super::*;
use crate::annotations::{ChromeElement, ClickTarget, DRAWING_LIFETIME, NOTE_LIFETIME};
use crate::chat::ChatTab;
use crate::config::{TransportConfig, WidgetConfig};
use crate::identity::LocalUser;
use crate::state::WidgetSnapshot;

const WAIT: Duration = Duration::from_secs(5);

fn offline_config() -> WidgetConfig {
    WidgetConfig::new("/", LocalUser::new("local-1", "Me", false))
}

async fn snap(widget: &Widget) -> WidgetSnapshot {
    widget.snapshot().await.expect("engine should be running")
}

/// Re-snapshot on every revision tick until `pred` holds.
async fn wait_until<F>(widget: &Widget, mut pred: F) -> WidgetSnapshot
where
    F: FnMut(&WidgetSnapshot) -> bool,
{
    let mut revision = widget.revision();
    tokio::time::timeout(WAIT, async {
        loop {
            let view = snap(widget).await;
            if pred(&view) {
                return view;
            }
            revision.changed().await.expect("engine should be running");
        }
    })
    .await
    .expect("condition should hold before the timeout")
}

// =============================================================================
// DEGRADED MODE
// =============================================================================

#[tokio::test]
async fn unconfigured_transport_starts_dead() {
    let widget = Engine::spawn(offline_config());
    let view = snap(&widget).await;
    assert_eq!(view.link, LinkStatus::Dead);
    assert_eq!(view.notices.len(), 1);
}

#[tokio::test]
async fn degraded_sends_are_noops_with_a_notice() {
    let widget = Engine::spawn(offline_config());
    widget.command(Command::SendMessage("hello?".into())).await;

    let view = wait_until(&widget, |v| v.notices.len() == 2).await;
    assert!(view.messages.is_empty(), "nothing should render locally");
    assert_eq!(view.badge, 0);
    assert!(view.notices[1].contains("offline"));
}

// =============================================================================
// DRAWER AND TABS
// =============================================================================

#[tokio::test]
async fn drawer_and_tab_commands_flow_through() {
    let widget = Engine::spawn(offline_config());

    widget.command(Command::OpenDrawer).await;
    let view = wait_until(&widget, |v| v.drawer_open).await;
    assert_eq!(view.active_tab, ChatTab::Web);

    widget.command(Command::SwitchTab(ChatTab::Friend)).await;
    let view = wait_until(&widget, |v| v.active_tab == ChatTab::Friend).await;
    assert!(view.selected_friend.is_none());

    widget.command(Command::CloseDrawer).await;
    wait_until(&widget, |v| !v.drawer_open).await;
}

#[tokio::test]
async fn revision_ticks_on_every_applied_change() {
    let widget = Engine::spawn(offline_config());
    let mut revision = widget.revision();
    let before = *revision.borrow();

    widget.command(Command::OpenDrawer).await;
    tokio::time::timeout(WAIT, revision.changed())
        .await
        .expect("revision should tick")
        .expect("engine should be running");
    assert!(*revision.borrow() > before);
}

// =============================================================================
// ANNOTATIONS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn page_clicks_place_notes_only_when_armed() {
    let widget = Engine::spawn(offline_config());

    // Not armed: a page click does nothing.
    widget
        .command(Command::PageClick {
            target: ClickTarget::Page { x: 10.0, y: 20.0 },
            note_body: "early".into(),
        })
        .await;
    assert!(snap(&widget).await.notes.is_empty());

    widget.command(Command::SetNotesMode(true)).await;

    // Armed, but the click landed on widget chrome.
    widget
        .command(Command::PageClick {
            target: ClickTarget::Chrome(ChromeElement::Drawer),
            note_body: "chrome".into(),
        })
        .await;
    assert!(snap(&widget).await.notes.is_empty());

    // Armed, bare page, blank text: still nothing.
    widget
        .command(Command::PageClick {
            target: ClickTarget::Page { x: 10.0, y: 20.0 },
            note_body: "   ".into(),
        })
        .await;
    assert!(snap(&widget).await.notes.is_empty());

    widget
        .command(Command::PageClick {
            target: ClickTarget::Page { x: 10.0, y: 20.0 },
            note_body: "ship it".into(),
        })
        .await;
    let view = wait_until(&widget, |v| v.notes.len() == 1).await;
    assert_eq!(view.notes[0].body, "ship it");
    assert!(view.notes[0].mine);
}

#[tokio::test(start_paused = true)]
async fn notes_expire_on_schedule() {
    let widget = Engine::spawn(offline_config());
    widget.command(Command::SetNotesMode(true)).await;
    widget
        .command(Command::PageClick {
            target: ClickTarget::Page { x: 1.0, y: 2.0 },
            note_body: "soon gone".into(),
        })
        .await;
    wait_until(&widget, |v| v.notes.len() == 1).await;

    tokio::time::sleep(NOTE_LIFETIME + Duration::from_secs(1)).await;
    wait_until(&widget, |v| v.notes.is_empty()).await;
}

#[tokio::test(start_paused = true)]
async fn strokes_rasterize_when_draw_mode_is_armed() {
    let widget = Engine::spawn(offline_config());

    // Not armed: stroke input is ignored.
    widget.command(Command::StrokeStart { x: 0.0, y: 0.0 }).await;
    widget.command(Command::StrokeEnd).await;
    assert!(snap(&widget).await.drawings.is_empty());

    widget.command(Command::SetDrawMode(true)).await;
    widget.command(Command::StrokeStart { x: 0.0, y: 0.0 }).await;
    widget.command(Command::StrokePoint { x: 30.0, y: 40.0 }).await;
    widget.command(Command::StrokePoint { x: 60.0, y: 10.0 }).await;
    widget.command(Command::StrokeEnd).await;

    let view = wait_until(&widget, |v| v.drawings.len() == 1).await;
    assert!(view.drawings[0].image.starts_with("<svg"));
    assert!(view.drawings[0].image.contains("<path"));

    tokio::time::sleep(DRAWING_LIFETIME + Duration::from_secs(1)).await;
    wait_until(&widget, |v| v.drawings.is_empty()).await;
}

// =============================================================================
// GUEST REGISTRATION
// =============================================================================

#[tokio::test]
async fn guest_registration_swaps_identity_and_caches_it() {
    let cache = std::env::temp_dir()
        .join(format!("copresence-engine-{}", uuid::Uuid::new_v4()))
        .join("guest.json");
    let mut config = offline_config();
    config.guest_cache_path.clone_from(&cache);

    let widget = Engine::spawn(config);
    widget
        .command(Command::RegisterGuest { name: "Ada".into(), email: "ada@example.com".into() })
        .await;

    let view = wait_until(&widget, |v| v.user_id.starts_with("guest-")).await;
    assert_ne!(view.user_id, "local-1");

    let cached: Value =
        serde_json::from_str(&std::fs::read_to_string(&cache).expect("cache file written"))
            .expect("cache is json");
    assert_eq!(cached["name"], "Ada");
    assert_eq!(cached["id"], Value::String(view.user_id.clone()));

    let _ = std::fs::remove_file(&cache);
}

#[tokio::test]
async fn invalid_guest_input_never_swaps_identity() {
    let widget = Engine::spawn(offline_config());
    widget
        .command(Command::RegisterGuest { name: "  ".into(), email: "a@b.example".into() })
        .await;

    // Startup notice plus the validation notice.
    let view = wait_until(&widget, |v| v.notices.len() == 2).await;
    assert_eq!(view.user_id, "local-1");
}

// =============================================================================
// END TO END OVER A LOOPBACK SOCKET
// =============================================================================

/// Accepts one widget connection, reports every received frame, and plays
/// back whatever the test queues for sending.
async fn loopback_server() -> (String, mpsc::Receiver<Value>, mpsc::Sender<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let url = format!("ws://{}", listener.local_addr().expect("local addr"));
    let (seen_tx, seen_rx) = mpsc::channel::<Value>(16);
    let (send_tx, mut send_rx) = mpsc::channel::<Value>(16);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(stream).await.expect("ws handshake");
        loop {
            tokio::select! {
                frame = ws.next() => {
                    let Some(Ok(frame)) = frame else { break };
                    if let Message::Text(text) = frame {
                        let value: Value = serde_json::from_str(text.as_str()).expect("frame json");
                        let _ = seen_tx.send(value).await;
                    }
                }
                queued = send_rx.recv() => {
                    let Some(queued) = queued else { break };
                    ws.send(Message::Text(queued.to_string().into())).await.expect("server send");
                }
            }
        }
    });

    (url, seen_rx, send_tx)
}

async fn next_frame(seen: &mut mpsc::Receiver<Value>) -> Value {
    tokio::time::timeout(WAIT, seen.recv())
        .await
        .expect("frame before timeout")
        .expect("server running")
}

#[tokio::test]
async fn connecting_announces_presence_and_sends_reach_the_wire() {
    let (url, mut seen, _send) = loopback_server().await;
    let mut config = offline_config();
    config.transport = Some(TransportConfig::Socket { url });

    let widget = Engine::spawn(config);
    wait_until(&widget, |v| v.link == LinkStatus::Up).await;

    let joined = next_frame(&mut seen).await;
    assert_eq!(joined["event"], "user-joined");
    assert_eq!(joined["data"]["user"]["id"], "local-1");
    assert_eq!(joined["data"]["page"], "/");

    widget.command(Command::SendMessage("hi room".into())).await;
    let sent = next_frame(&mut seen).await;
    assert_eq!(sent["event"], "new-message");
    assert_eq!(sent["data"]["body"], "hi room");
    assert_eq!(sent["data"]["user"]["id"], "local-1");

    // Optimistic render: visible at once, badge bumped while closed.
    let view = wait_until(&widget, |v| v.messages.len() == 1).await;
    assert_eq!(view.badge, 1);
}

#[tokio::test]
async fn inbound_traffic_flows_into_chat_and_presence() {
    let (url, mut seen, send) = loopback_server().await;
    let mut config = offline_config();
    config.transport = Some(TransportConfig::Socket { url });

    let widget = Engine::spawn(config);
    wait_until(&widget, |v| v.link == LinkStatus::Up).await;
    next_frame(&mut seen).await; // our user-joined

    send.send(json!({
        "event": "new-message",
        "data": {
            "user": { "id": "peer-9", "name": "Ray", "color": "#2ec4b6" },
            "id": "m-1",
            "body": "hello there",
            "created_at": 1_700_000_000_000_i64,
            "dedupe_key": "k-1",
        },
    }))
    .await
    .expect("server alive");

    let view = wait_until(&widget, |v| v.messages.len() == 1).await;
    assert_eq!(view.messages[0].author_name, "Ray");
    assert_eq!(view.badge, 1, "drawer closed: badge counts the arrival");
    assert_eq!(view.unread.web, 1);

    send.send(json!({
        "event": "cursor-move",
        "data": {
            "user": { "id": "peer-9", "name": "Ray", "color": "#2ec4b6" },
            "page": "/",
            "x": 5.0,
            "y": 6.0,
        },
    }))
    .await
    .expect("server alive");

    let view = wait_until(&widget, |v| v.cursors.len() == 1).await;
    assert_eq!(view.dock.chips.len(), 1);
    assert_eq!(view.dock.chips[0].name, "Ray");

    // Opening the drawer clears the badge and the web counter.
    widget.command(Command::OpenDrawer).await;
    let view = wait_until(&widget, |v| v.drawer_open).await;
    assert_eq!(view.badge, 0);
    assert_eq!(view.unread.web, 0);
}
