//! Shared wire event model for the copresence realtime protocol.
//!
//! This crate owns the event vocabulary used by both transport backends and
//! the widget engine. Every broadcast is an [`Envelope`]: an optional sender,
//! an optional page scope, and a typed [`Event`] payload. The set of event
//! kinds is closed: dispatch is an exhaustive `match`, not a string switch.
//!
//! WIRE FORM
//! =========
//! Payloads are flat JSON objects. The common fields are `user` (sender ref)
//! and `page` (scope path); everything else is event-specific. Event names on
//! the wire may arrive with or without the `client-` prefix (hosted relays
//! echo client-originated events in either form), so parsing accepts both.

use serde_json::{Map, Value};

/// Error returned when an inbound payload cannot be interpreted.
///
/// Malformed events are dropped by the router; they never crash the widget.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The wire event name does not map to a known [`EventKind`].
    #[error("unknown event name: {0}")]
    UnknownEvent(String),
    /// A required payload field is absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    /// A payload field is present but has the wrong shape.
    #[error("invalid value for field `{0}`")]
    InvalidField(&'static str),
}

// =============================================================================
// EVENT KIND
// =============================================================================

/// Closed enumeration of every logical event on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    CursorMove,
    CursorLeave,
    UserJoined,
    UserLeft,
    NewMessage,
    IndividualMessage,
    SupportMessage,
    AdminSupportReply,
    MessageDeleted,
    NoteCreated,
    NoteDeleted,
    DrawingCreated,
    DrawingDeleted,
}

impl EventKind {
    /// Every kind, in a fixed order. Relay subscriptions bind each kind under
    /// both its bare and `client-` prefixed name, so subscribers iterate this.
    pub const ALL: [EventKind; 13] = [
        EventKind::CursorMove,
        EventKind::CursorLeave,
        EventKind::UserJoined,
        EventKind::UserLeft,
        EventKind::NewMessage,
        EventKind::IndividualMessage,
        EventKind::SupportMessage,
        EventKind::AdminSupportReply,
        EventKind::MessageDeleted,
        EventKind::NoteCreated,
        EventKind::NoteDeleted,
        EventKind::DrawingCreated,
        EventKind::DrawingDeleted,
    ];

    /// Canonical (unprefixed) wire name.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::CursorMove => "cursor-move",
            Self::CursorLeave => "cursor-leave",
            Self::UserJoined => "user-joined",
            Self::UserLeft => "user-left",
            Self::NewMessage => "new-message",
            Self::IndividualMessage => "individual-message",
            Self::SupportMessage => "support-message",
            Self::AdminSupportReply => "admin-support-reply",
            Self::MessageDeleted => "message-deleted",
            Self::NoteCreated => "note-created",
            Self::NoteDeleted => "note-deleted",
            Self::DrawingCreated => "drawing-created",
            Self::DrawingDeleted => "drawing-deleted",
        }
    }

    /// Client-originated wire name (`client-` prefix), used when publishing
    /// through a hosted relay channel.
    #[must_use]
    pub fn client_wire_name(self) -> String {
        format!("client-{}", self.wire_name())
    }

    /// Parse a wire name, tolerating an optional `client-` prefix.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let bare = name.strip_prefix("client-").unwrap_or(name);
        Self::ALL.into_iter().find(|kind| kind.wire_name() == bare)
    }
}

// =============================================================================
// PAYLOAD TYPES
// =============================================================================

/// Sender identity carried on every envelope.
///
/// Ids are canonicalized to strings at this boundary: the backing store hands
/// out numeric ids for registered users and string ids for guests, and
/// keeping both representations alive forces double bookkeeping downstream.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PeerRef {
    pub id: String,
    pub name: String,
    pub color: String,
}

/// A chat message as it travels on the wire. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireMessage {
    pub id: String,
    pub body: String,
    /// Milliseconds since the Unix epoch, assigned by the author.
    pub created_at: i64,
    /// Delivery fingerprint. Synthesized from author/body/timestamp when the
    /// transport does not supply one.
    pub dedupe_key: Option<String>,
}

/// A sticky note as broadcast to peers.
#[derive(Clone, Debug, PartialEq)]
pub struct WireNote {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub body: String,
}

/// A finished drawing: one rasterized snapshot, never the point stream.
#[derive(Clone, Debug, PartialEq)]
pub struct WireDrawing {
    pub id: String,
    /// Self-contained image document (SVG snapshot of the stroke).
    pub image: String,
    pub width: f64,
    pub height: f64,
}

/// Typed payload union over the closed event set.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    CursorMove { x: f64, y: f64 },
    CursorLeave,
    UserJoined,
    UserLeft,
    NewMessage(WireMessage),
    IndividualMessage { message: WireMessage, recipient_id: String },
    SupportMessage(WireMessage),
    AdminSupportReply { message: WireMessage, target_user_id: String },
    MessageDeleted { message_id: String },
    NoteCreated(WireNote),
    NoteDeleted { note_id: String },
    DrawingCreated(WireDrawing),
    DrawingDeleted { drawing_id: String },
}

impl Event {
    /// The kind tag for this payload.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::CursorMove { .. } => EventKind::CursorMove,
            Self::CursorLeave => EventKind::CursorLeave,
            Self::UserJoined => EventKind::UserJoined,
            Self::UserLeft => EventKind::UserLeft,
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::IndividualMessage { .. } => EventKind::IndividualMessage,
            Self::SupportMessage(_) => EventKind::SupportMessage,
            Self::AdminSupportReply { .. } => EventKind::AdminSupportReply,
            Self::MessageDeleted { .. } => EventKind::MessageDeleted,
            Self::NoteCreated(_) => EventKind::NoteCreated,
            Self::NoteDeleted { .. } => EventKind::NoteDeleted,
            Self::DrawingCreated(_) => EventKind::DrawingCreated,
            Self::DrawingDeleted { .. } => EventKind::DrawingDeleted,
        }
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// One broadcast on the realtime wire.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Author of the event. Absent only for system-originated traffic.
    pub sender: Option<PeerRef>,
    /// Page path this event is scoped to. Presence and annotations carry it;
    /// chat traffic is site-wide and does not.
    pub page: Option<String>,
    pub event: Event,
}

impl Envelope {
    /// Parse an inbound wire event.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] for unknown names or malformed payloads.
    pub fn parse(wire_name: &str, payload: &Value) -> Result<Self, ProtocolError> {
        let kind = EventKind::parse(wire_name)
            .ok_or_else(|| ProtocolError::UnknownEvent(wire_name.to_owned()))?;

        let sender = payload.get("user").and_then(parse_peer_ref);
        let page = payload
            .get("page")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);

        let event = match kind {
            EventKind::CursorMove => Event::CursorMove {
                x: require_f64(payload, "x")?,
                y: require_f64(payload, "y")?,
            },
            EventKind::CursorLeave => Event::CursorLeave,
            EventKind::UserJoined => Event::UserJoined,
            EventKind::UserLeft => Event::UserLeft,
            EventKind::NewMessage => Event::NewMessage(parse_message(payload)?),
            EventKind::IndividualMessage => Event::IndividualMessage {
                message: parse_message(payload)?,
                recipient_id: require_id(payload, "recipient_id")?,
            },
            EventKind::SupportMessage => Event::SupportMessage(parse_message(payload)?),
            EventKind::AdminSupportReply => Event::AdminSupportReply {
                message: parse_message(payload)?,
                target_user_id: require_id(payload, "user_id")?,
            },
            EventKind::MessageDeleted => Event::MessageDeleted {
                message_id: require_id_any(payload, &["message_id", "id"], "message_id")?,
            },
            EventKind::NoteCreated => Event::NoteCreated(WireNote {
                id: require_id(payload, "id")?,
                x: require_f64(payload, "x")?,
                y: require_f64(payload, "y")?,
                body: require_str(payload, "body")?,
            }),
            EventKind::NoteDeleted => Event::NoteDeleted { note_id: require_id(payload, "id")? },
            EventKind::DrawingCreated => Event::DrawingCreated(WireDrawing {
                id: require_id(payload, "id")?,
                image: require_str(payload, "image")?,
                width: require_f64(payload, "width")?,
                height: require_f64(payload, "height")?,
            }),
            EventKind::DrawingDeleted => Event::DrawingDeleted { drawing_id: require_id(payload, "id")? },
        };

        Ok(Self { sender, page, event })
    }

    /// Serialize for publishing. Returns the canonical wire name and a flat
    /// JSON payload; relay publishers prefix the name themselves.
    #[must_use]
    pub fn to_wire(&self) -> (&'static str, Value) {
        let mut map = Map::new();

        if let Some(sender) = &self.sender {
            map.insert(
                "user".into(),
                serde_json::json!({ "id": sender.id, "name": sender.name, "color": sender.color }),
            );
        }
        if let Some(page) = &self.page {
            map.insert("page".into(), Value::String(page.clone()));
        }

        match &self.event {
            Event::CursorMove { x, y } => {
                map.insert("x".into(), serde_json::json!(x));
                map.insert("y".into(), serde_json::json!(y));
            }
            Event::CursorLeave | Event::UserJoined | Event::UserLeft => {}
            Event::NewMessage(msg) | Event::SupportMessage(msg) => {
                write_message(&mut map, msg);
            }
            Event::IndividualMessage { message, recipient_id } => {
                write_message(&mut map, message);
                map.insert("recipient_id".into(), Value::String(recipient_id.clone()));
            }
            Event::AdminSupportReply { message, target_user_id } => {
                write_message(&mut map, message);
                map.insert("user_id".into(), Value::String(target_user_id.clone()));
            }
            Event::MessageDeleted { message_id } => {
                map.insert("message_id".into(), Value::String(message_id.clone()));
            }
            Event::NoteCreated(note) => {
                map.insert("id".into(), Value::String(note.id.clone()));
                map.insert("x".into(), serde_json::json!(note.x));
                map.insert("y".into(), serde_json::json!(note.y));
                map.insert("body".into(), Value::String(note.body.clone()));
            }
            Event::NoteDeleted { note_id } => {
                map.insert("id".into(), Value::String(note_id.clone()));
            }
            Event::DrawingCreated(drawing) => {
                map.insert("id".into(), Value::String(drawing.id.clone()));
                map.insert("image".into(), Value::String(drawing.image.clone()));
                map.insert("width".into(), serde_json::json!(drawing.width));
                map.insert("height".into(), serde_json::json!(drawing.height));
            }
            Event::DrawingDeleted { drawing_id } => {
                map.insert("id".into(), Value::String(drawing_id.clone()));
            }
        }

        (self.event.kind().wire_name(), Value::Object(map))
    }

    /// Delivery fingerprint for the dedup cache.
    ///
    /// `None` for cursor and presence traffic: those are idempotent position
    /// updates and re-delivery is harmless. Everything that renders a durable
    /// entity gets a key, because hosted relays may echo the same event under
    /// both its `client-` and bare name.
    #[must_use]
    pub fn dedupe_key(&self) -> Option<String> {
        let author_id = self.sender.as_ref().map_or("", |peer| peer.id.as_str());
        match &self.event {
            Event::CursorMove { .. }
            | Event::CursorLeave
            | Event::UserJoined
            | Event::UserLeft => None,
            Event::NewMessage(msg)
            | Event::SupportMessage(msg)
            | Event::IndividualMessage { message: msg, .. }
            | Event::AdminSupportReply { message: msg, .. } => Some(
                msg.dedupe_key
                    .clone()
                    .unwrap_or_else(|| synthesized_dedupe_key(author_id, &msg.body, msg.created_at)),
            ),
            Event::MessageDeleted { message_id } => Some(format!("message-deleted:{message_id}")),
            Event::NoteCreated(note) => Some(format!("note:{}", note.id)),
            Event::NoteDeleted { note_id } => Some(format!("note-deleted:{note_id}")),
            Event::DrawingCreated(drawing) => Some(format!("drawing:{}", drawing.id)),
            Event::DrawingDeleted { drawing_id } => Some(format!("drawing-deleted:{drawing_id}")),
        }
    }
}

/// Fallback delivery fingerprint: author + timestamp + body.
///
/// Two distinct messages with identical author, body, and timestamp collide.
/// Accepted tradeoff: the cache only suppresses near-duplicate delivery.
#[must_use]
pub fn synthesized_dedupe_key(author_id: &str, body: &str, created_at: i64) -> String {
    format!("{author_id}|{created_at}|{body}")
}

/// Coerce a JSON id value (string or number) to its canonical string form.
#[must_use]
pub fn canonical_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// FIELD HELPERS
// =============================================================================

fn parse_peer_ref(value: &Value) -> Option<PeerRef> {
    let id = canonical_id(value.get("id")?)?;
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("Guest")
        .to_owned();
    let color = value
        .get("color")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    Some(PeerRef { id, name, color })
}

fn parse_message(payload: &Value) -> Result<WireMessage, ProtocolError> {
    // Older backends send the text under `message` instead of `body`.
    let body = payload
        .get("body")
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingField("body"))?
        .to_owned();

    let id = payload
        .get("id")
        .and_then(canonical_id)
        .ok_or(ProtocolError::MissingField("id"))?;

    let created_at = payload
        .get("created_at")
        .and_then(json_i64)
        .ok_or(ProtocolError::MissingField("created_at"))?;

    let dedupe_key = payload
        .get("dedupe_key")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);

    Ok(WireMessage { id, body, created_at, dedupe_key })
}

fn write_message(map: &mut Map<String, Value>, msg: &WireMessage) {
    map.insert("id".into(), Value::String(msg.id.clone()));
    map.insert("body".into(), Value::String(msg.body.clone()));
    map.insert("created_at".into(), serde_json::json!(msg.created_at));
    if let Some(key) = &msg.dedupe_key {
        map.insert("dedupe_key".into(), Value::String(key.clone()));
    }
}

fn require_f64(payload: &Value, field: &'static str) -> Result<f64, ProtocolError> {
    let value = payload.get(field).ok_or(ProtocolError::MissingField(field))?;
    value.as_f64().ok_or(ProtocolError::InvalidField(field))
}

fn require_str(payload: &Value, field: &'static str) -> Result<String, ProtocolError> {
    let value = payload.get(field).ok_or(ProtocolError::MissingField(field))?;
    value
        .as_str()
        .map(ToOwned::to_owned)
        .ok_or(ProtocolError::InvalidField(field))
}

fn require_id(payload: &Value, field: &'static str) -> Result<String, ProtocolError> {
    let value = payload.get(field).ok_or(ProtocolError::MissingField(field))?;
    canonical_id(value).ok_or(ProtocolError::InvalidField(field))
}

fn require_id_any(
    payload: &Value,
    fields: &[&'static str],
    primary: &'static str,
) -> Result<String, ProtocolError> {
    for field in fields {
        if let Some(value) = payload.get(*field) {
            return canonical_id(value).ok_or(ProtocolError::InvalidField(primary));
        }
    }
    Err(ProtocolError::MissingField(primary))
}

fn json_i64(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        #[allow(clippy::cast_possible_truncation)]
        value.as_f64().map(|f| f as i64)
    })
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
