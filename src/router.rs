//! Inbound event routing.
//!
//! DESIGN
//! ======
//! Every event delivered by the transport passes through [`route`] in
//! delivery order. The router applies three drop gates before any state is
//! touched:
//!
//! 1. Local echo: events authored by this session never re-render, whatever
//!    their kind. Local state was already updated optimistically at send
//!    time.
//! 2. Page scope: an envelope carrying a page path for a different page is
//!    dropped. Envelopes without a page field are site-wide.
//! 3. Dedup: envelopes with a dedupe key are checked-then-inserted against
//!    the bounded cache; a hit drops the event.
//!
//! Surviving events dispatch by kind to presence, chat, or the annotation
//! boards, and the derived views are refreshed unconditionally afterwards.
//! No buffering, no reordering: out-of-order delivery shows up as
//! out-of-order updates, which is acceptable for a best-effort presence
//! layer.

use std::time::Instant;

use events::{Envelope, Event};
use tracing::debug;

use crate::state::WidgetState;

// =============================================================================
// OUTCOME
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The event reached its domain handler.
    Applied,
    Dropped(DropReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Authored by the local user.
    LocalEcho,
    /// Scoped to a different page path.
    PageMismatch,
    /// Dedupe key already seen.
    Duplicate,
    /// The kind needs a sender and the envelope has none.
    NoSender,
}

// =============================================================================
// ROUTING
// =============================================================================

/// Route one inbound envelope through the drop gates and into the owning
/// domain handler.
pub fn route(state: &mut WidgetState, envelope: &Envelope, now: Instant) -> RouteOutcome {
    if let Some(sender) = &envelope.sender {
        if sender.id == state.local.id {
            return RouteOutcome::Dropped(DropReason::LocalEcho);
        }
    }

    if let Some(page) = &envelope.page {
        if *page != state.page {
            debug!(kind = envelope.event.kind().wire_name(), page, "dropped off-page event");
            return RouteOutcome::Dropped(DropReason::PageMismatch);
        }
    }

    if let Some(key) = envelope.dedupe_key() {
        if !state.dedup.insert(key) {
            debug!(kind = envelope.event.kind().wire_name(), "dropped duplicate event");
            return RouteOutcome::Dropped(DropReason::Duplicate);
        }
    }

    let sender = envelope.sender.as_ref();
    match &envelope.event {
        Event::CursorMove { x, y } => {
            let Some(peer) = sender else {
                return RouteOutcome::Dropped(DropReason::NoSender);
            };
            state.presence.observe_cursor(peer, *x, *y, now);
        }
        Event::CursorLeave => {
            let Some(peer) = sender else {
                return RouteOutcome::Dropped(DropReason::NoSender);
            };
            state.presence.mark_left(&peer.id);
        }
        Event::UserJoined => {
            let Some(peer) = sender else {
                return RouteOutcome::Dropped(DropReason::NoSender);
            };
            state.presence.observe_presence(peer, now);
        }
        Event::UserLeft => {
            let Some(peer) = sender else {
                return RouteOutcome::Dropped(DropReason::NoSender);
            };
            state.presence.remove(&peer.id);
        }
        Event::NewMessage(msg) => {
            let Some(peer) = sender else {
                return RouteOutcome::Dropped(DropReason::NoSender);
            };
            state.chat.record_web_message(peer, msg);
        }
        Event::IndividualMessage { message, recipient_id } => {
            let Some(peer) = sender else {
                return RouteOutcome::Dropped(DropReason::NoSender);
            };
            state.chat.record_individual_message(peer, message, recipient_id);
        }
        Event::SupportMessage(msg) => {
            let Some(peer) = sender else {
                return RouteOutcome::Dropped(DropReason::NoSender);
            };
            state.chat.record_support_message(peer, msg);
        }
        Event::AdminSupportReply { message, target_user_id } => {
            let Some(peer) = sender else {
                return RouteOutcome::Dropped(DropReason::NoSender);
            };
            state.chat.record_admin_reply(peer, message, target_user_id);
        }
        Event::MessageDeleted { message_id } => {
            state.chat.message_deleted(message_id);
        }
        Event::NoteCreated(note) => {
            let Some(peer) = sender else {
                return RouteOutcome::Dropped(DropReason::NoSender);
            };
            state.notes.receive(peer, note, now);
        }
        Event::NoteDeleted { note_id } => {
            state.notes.remove(note_id);
        }
        Event::DrawingCreated(drawing) => {
            let Some(peer) = sender else {
                return RouteOutcome::Dropped(DropReason::NoSender);
            };
            state.drawings.receive(peer, drawing, now);
        }
        Event::DrawingDeleted { drawing_id } => {
            state.drawings.remove(drawing_id);
        }
    }

    state.refresh_views();
    RouteOutcome::Applied
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;
