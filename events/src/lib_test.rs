use super::*;

fn sender_json() -> Value {
    serde_json::json!({ "id": "u-7", "name": "Mara", "color": "#d94b4b" })
}

#[test]
fn every_kind_round_trips_through_its_wire_name() {
    for kind in EventKind::ALL {
        assert_eq!(EventKind::parse(kind.wire_name()), Some(kind));
    }
}

#[test]
fn parse_accepts_client_prefixed_names() {
    assert_eq!(EventKind::parse("client-cursor-move"), Some(EventKind::CursorMove));
    assert_eq!(EventKind::parse("client-new-message"), Some(EventKind::NewMessage));
    assert_eq!(EventKind::parse("cursor-move"), Some(EventKind::CursorMove));
}

#[test]
fn parse_rejects_unknown_names() {
    assert_eq!(EventKind::parse("client-"), None);
    assert_eq!(EventKind::parse("presence-ping"), None);
    assert_eq!(EventKind::parse(""), None);
}

#[test]
fn client_wire_name_prefixes_the_bare_name() {
    assert_eq!(EventKind::NoteCreated.client_wire_name(), "client-note-created");
}

#[test]
fn cursor_move_parses_coordinates_and_scope() {
    let payload = serde_json::json!({
        "user": sender_json(),
        "page": "/blog",
        "x": 100.0,
        "y": 200,
    });

    let env = Envelope::parse("cursor-move", &payload).expect("parse");
    assert_eq!(env.page.as_deref(), Some("/blog"));
    assert_eq!(env.sender.as_ref().map(|p| p.id.as_str()), Some("u-7"));
    assert_eq!(env.event, Event::CursorMove { x: 100.0, y: 200.0 });
}

#[test]
fn cursor_move_without_coordinates_is_malformed() {
    let payload = serde_json::json!({ "user": sender_json(), "page": "/" });
    let err = Envelope::parse("cursor-move", &payload).expect_err("should fail");
    assert!(matches!(err, ProtocolError::MissingField("x")));
}

#[test]
fn numeric_sender_id_is_canonicalized_to_string() {
    let payload = serde_json::json!({
        "user": { "id": 42, "name": "Iris", "color": "#222222" },
        "x": 1.0,
        "y": 2.0,
    });

    let env = Envelope::parse("cursor-move", &payload).expect("parse");
    assert_eq!(env.sender.expect("sender").id, "42");
}

#[test]
fn new_message_parses_body_and_timestamp() {
    let payload = serde_json::json!({
        "user": sender_json(),
        "id": "m-1",
        "body": "hello",
        "created_at": 1_700_000_000_123_i64,
    });

    let env = Envelope::parse("new-message", &payload).expect("parse");
    let Event::NewMessage(msg) = env.event else {
        panic!("expected NewMessage");
    };
    assert_eq!(msg.body, "hello");
    assert_eq!(msg.created_at, 1_700_000_000_123);
    assert!(msg.dedupe_key.is_none());
}

#[test]
fn message_accepts_legacy_message_field_for_body() {
    let payload = serde_json::json!({
        "user": sender_json(),
        "id": "m-2",
        "message": "old form",
        "created_at": 5,
    });

    let env = Envelope::parse("new-message", &payload).expect("parse");
    let Event::NewMessage(msg) = env.event else {
        panic!("expected NewMessage");
    };
    assert_eq!(msg.body, "old form");
}

#[test]
fn message_without_body_is_malformed() {
    let payload = serde_json::json!({ "user": sender_json(), "id": "m-3", "created_at": 5 });
    let err = Envelope::parse("new-message", &payload).expect_err("should fail");
    assert!(matches!(err, ProtocolError::MissingField("body")));
}

#[test]
fn admin_reply_requires_target_user_id() {
    let payload = serde_json::json!({
        "user": sender_json(),
        "id": "m-4",
        "body": "thanks",
        "created_at": 9,
    });
    let err = Envelope::parse("admin-support-reply", &payload).expect_err("should fail");
    assert!(matches!(err, ProtocolError::MissingField("user_id")));
}

#[test]
fn admin_reply_target_id_tolerates_numbers() {
    let payload = serde_json::json!({
        "user": sender_json(),
        "id": "m-5",
        "body": "thanks",
        "created_at": 9,
        "user_id": 42,
    });

    let env = Envelope::parse("admin-support-reply", &payload).expect("parse");
    let Event::AdminSupportReply { target_user_id, .. } = env.event else {
        panic!("expected AdminSupportReply");
    };
    assert_eq!(target_user_id, "42");
}

#[test]
fn message_deleted_accepts_id_alias() {
    let payload = serde_json::json!({ "id": "m-6" });
    let env = Envelope::parse("message-deleted", &payload).expect("parse");
    assert_eq!(env.event, Event::MessageDeleted { message_id: "m-6".into() });
}

#[test]
fn note_round_trips_through_wire_form() {
    let env = Envelope {
        sender: Some(PeerRef { id: "u-7".into(), name: "Mara".into(), color: "#d94b4b".into() }),
        page: Some("/pricing".into()),
        event: Event::NoteCreated(WireNote {
            id: "n-1".into(),
            x: 12.5,
            y: 40.0,
            body: "look here".into(),
        }),
    };

    let (name, payload) = env.to_wire();
    assert_eq!(name, "note-created");
    let parsed = Envelope::parse(name, &payload).expect("parse");
    assert_eq!(parsed, env);
}

#[test]
fn drawing_round_trips_through_wire_form() {
    let env = Envelope {
        sender: Some(PeerRef { id: "9".into(), name: "Ken".into(), color: "#2ec4b6".into() }),
        page: Some("/".into()),
        event: Event::DrawingCreated(WireDrawing {
            id: "d-1".into(),
            image: "<svg/>".into(),
            width: 320.0,
            height: 200.0,
        }),
    };

    let (name, payload) = env.to_wire();
    assert_eq!(name, "drawing-created");
    assert_eq!(Envelope::parse(name, &payload).expect("parse"), env);
}

#[test]
fn individual_message_round_trips_with_recipient() {
    let env = Envelope {
        sender: Some(PeerRef { id: "u-1".into(), name: "A".into(), color: "#111111".into() }),
        page: None,
        event: Event::IndividualMessage {
            message: WireMessage {
                id: "m-7".into(),
                body: "psst".into(),
                created_at: 77,
                dedupe_key: Some("k".into()),
            },
            recipient_id: "u-2".into(),
        },
    };

    let (name, payload) = env.to_wire();
    assert_eq!(Envelope::parse(name, &payload).expect("parse"), env);
}

#[test]
fn dedupe_key_prefers_the_explicit_key() {
    let env = Envelope {
        sender: Some(PeerRef { id: "u-1".into(), name: "A".into(), color: String::new() }),
        page: None,
        event: Event::NewMessage(WireMessage {
            id: "m-8".into(),
            body: "x".into(),
            created_at: 1,
            dedupe_key: Some("explicit".into()),
        }),
    };
    assert_eq!(env.dedupe_key().as_deref(), Some("explicit"));
}

#[test]
fn dedupe_key_is_synthesized_from_author_body_timestamp() {
    let env = Envelope {
        sender: Some(PeerRef { id: "u-1".into(), name: "A".into(), color: String::new() }),
        page: None,
        event: Event::NewMessage(WireMessage {
            id: "m-9".into(),
            body: "hi".into(),
            created_at: 123,
            dedupe_key: None,
        }),
    };
    assert_eq!(env.dedupe_key().as_deref(), Some("u-1|123|hi"));
}

#[test]
fn cursor_and_presence_events_carry_no_dedupe_key() {
    let sender = Some(PeerRef { id: "u-1".into(), name: "A".into(), color: String::new() });
    for event in [
        Event::CursorMove { x: 0.0, y: 0.0 },
        Event::CursorLeave,
        Event::UserJoined,
        Event::UserLeft,
    ] {
        let env = Envelope { sender: sender.clone(), page: Some("/".into()), event };
        assert_eq!(env.dedupe_key(), None);
    }
}

#[test]
fn annotation_keys_are_kind_qualified() {
    let note = Envelope {
        sender: None,
        page: None,
        event: Event::NoteDeleted { note_id: "n-1".into() },
    };
    let drawing = Envelope {
        sender: None,
        page: None,
        event: Event::DrawingCreated(WireDrawing {
            id: "n-1".into(),
            image: String::new(),
            width: 0.0,
            height: 0.0,
        }),
    };
    // Same entity id, different kinds: keys must not collide.
    assert_ne!(note.dedupe_key(), drawing.dedupe_key());
}

#[test]
fn canonical_id_rejects_non_scalar_values() {
    assert_eq!(canonical_id(&serde_json::json!({"id": 1})), None);
    assert_eq!(canonical_id(&serde_json::json!(["x"])), None);
    assert_eq!(canonical_id(&serde_json::json!("x")).as_deref(), Some("x"));
    assert_eq!(canonical_id(&serde_json::json!(7)).as_deref(), Some("7"));
}
