use std::time::Instant;

use events::{Envelope, Event, WireMessage, WireNote};

use super::{DropReason, RouteOutcome, route};
use crate::state::WidgetState;
use crate::state::test_helpers::{test_peer, test_state};

fn envelope(sender_id: &str, page: Option<&str>, event: Event) -> Envelope {
    Envelope {
        sender: Some(test_peer(sender_id, "Peer")),
        page: page.map(str::to_owned),
        event,
    }
}

fn wire_message(id: &str, body: &str, created_at: i64) -> WireMessage {
    WireMessage {
        id: id.to_owned(),
        body: body.to_owned(),
        created_at,
        dedupe_key: None,
    }
}

#[test]
fn local_echo_is_dropped_for_every_kind() {
    let mut state = test_state();
    let local_id = state.local.id.clone();
    let echoes = vec![
        Event::CursorMove { x: 1.0, y: 2.0 },
        Event::CursorLeave,
        Event::UserJoined,
        Event::NewMessage(wire_message("m1", "hi", 1)),
        Event::SupportMessage(wire_message("m2", "help", 2)),
        Event::NoteCreated(WireNote {
            id: "n1".into(),
            x: 0.0,
            y: 0.0,
            body: "note".into(),
        }),
        Event::NoteDeleted { note_id: "n1".into() },
    ];

    for event in echoes {
        let outcome = route(&mut state, &envelope(&local_id, Some("/"), event), Instant::now());
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::LocalEcho));
    }

    assert!(state.presence.is_empty());
    assert!(state.chat.active_messages().is_empty());
    assert!(state.notes.is_empty());
    // Echoes are dropped before the dedup gate, so nothing was inserted.
    assert!(state.dedup.is_empty());
}

#[test]
fn off_page_cursor_move_creates_no_entity() {
    // Peer cursor-move for page "/blog" arriving on "/home" is dropped whole.
    let mut state = WidgetState::new(crate::identity::LocalUser::new("local-1", "Me", false), "/home");
    let event = Event::CursorMove { x: 100.0, y: 200.0 };

    let outcome = route(&mut state, &envelope("7", Some("/blog"), event), Instant::now());

    assert_eq!(outcome, RouteOutcome::Dropped(DropReason::PageMismatch));
    assert!(state.presence.get("7").is_none());
    assert!(state.presence.is_empty());
}

#[test]
fn off_page_note_mutates_nothing() {
    let mut state = test_state();
    let note = WireNote { id: "n1".into(), x: 5.0, y: 5.0, body: "hello".into() };

    let outcome = route(
        &mut state,
        &envelope("7", Some("/about"), Event::NoteCreated(note)),
        Instant::now(),
    );

    assert_eq!(outcome, RouteOutcome::Dropped(DropReason::PageMismatch));
    assert!(state.notes.is_empty());
    assert!(state.dedup.is_empty());
}

#[test]
fn chat_messages_are_site_wide() {
    let mut state = WidgetState::new(crate::identity::LocalUser::new("local-1", "Me", false), "/home");
    let event = Event::NewMessage(wire_message("m1", "hi all", 1_000));

    // No page field on the envelope, so the scope gate does not apply.
    let outcome = route(&mut state, &envelope("7", None, event), Instant::now());

    assert_eq!(outcome, RouteOutcome::Applied);
    assert_eq!(state.chat.active_messages().len(), 1);
}

#[test]
fn duplicate_message_renders_once() {
    let mut state = test_state();
    let make = || envelope("7", None, Event::NewMessage(wire_message("m1", "hi", 1_000)));

    assert_eq!(route(&mut state, &make(), Instant::now()), RouteOutcome::Applied);
    assert_eq!(
        route(&mut state, &make(), Instant::now()),
        RouteOutcome::Dropped(DropReason::Duplicate)
    );
    assert_eq!(state.chat.active_messages().len(), 1);
}

#[test]
fn synthesized_keys_collide_across_distinct_ids() {
    // Two deliveries of the same (author, body, createdAt) triple dedupe even
    // when the transport assigned them different message ids.
    let mut state = test_state();
    let first = envelope("7", None, Event::NewMessage(wire_message("a", "hi", 5)));
    let second = envelope("7", None, Event::NewMessage(wire_message("b", "hi", 5)));

    assert_eq!(route(&mut state, &first, Instant::now()), RouteOutcome::Applied);
    assert_eq!(
        route(&mut state, &second, Instant::now()),
        RouteOutcome::Dropped(DropReason::Duplicate)
    );
    assert_eq!(state.chat.active_messages().len(), 1);
}

#[test]
fn cursor_events_flow_into_presence() {
    let mut state = test_state();
    let now = Instant::now();

    route(&mut state, &envelope("7", Some("/"), Event::CursorMove { x: 3.0, y: 4.0 }), now);
    let entity = state.presence.get("7").unwrap();
    assert!(entity.visible);
    assert_eq!((entity.x, entity.y), (3.0, 4.0));

    route(&mut state, &envelope("7", Some("/"), Event::CursorLeave), now);
    assert!(!state.presence.get("7").unwrap().visible);

    route(&mut state, &envelope("7", Some("/"), Event::UserLeft), now);
    assert!(state.presence.get("7").is_none());
}

#[test]
fn dispatch_refreshes_the_avatar_dock() {
    let mut state = test_state();

    route(&mut state, &envelope("7", Some("/"), Event::CursorMove { x: 1.0, y: 1.0 }), Instant::now());

    assert_eq!(state.dock.chips.len(), 1);
    assert_eq!(state.dock.chips[0].user_id, "7");
}

#[test]
fn sender_required_kinds_drop_without_one() {
    let mut state = test_state();
    let bare = Envelope {
        sender: None,
        page: Some("/".into()),
        event: Event::CursorMove { x: 1.0, y: 1.0 },
    };

    let outcome = route(&mut state, &bare, Instant::now());

    assert_eq!(outcome, RouteOutcome::Dropped(DropReason::NoSender));
    assert!(state.presence.is_empty());
}

#[test]
fn deletions_apply_without_a_sender() {
    let mut state = test_state();
    route(
        &mut state,
        &envelope("7", None, Event::NewMessage(wire_message("m1", "hi", 1))),
        Instant::now(),
    );

    let deletion = Envelope {
        sender: None,
        page: None,
        event: Event::MessageDeleted { message_id: "m1".into() },
    };
    assert_eq!(route(&mut state, &deletion, Instant::now()), RouteOutcome::Applied);
    assert!(state.chat.active_messages().is_empty());
}

#[test]
fn note_lifecycle_via_router() {
    let mut state = test_state();
    let now = Instant::now();
    let note = WireNote { id: "n1".into(), x: 10.0, y: 20.0, body: "look here".into() };

    route(&mut state, &envelope("7", Some("/"), Event::NoteCreated(note)), now);
    assert_eq!(state.notes.len(), 1);

    route(&mut state, &envelope("9", Some("/"), Event::NoteDeleted { note_id: "n1".into() }), now);
    assert!(state.notes.is_empty());
}
