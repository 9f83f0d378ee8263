//! Sticky notes.
//!
//! Notes live for ten seconds from local render. The author's countdown
//! starts at placement, each peer's at receipt. An explicit delete (notes
//! support user deletion, drawings do not) removes immediately and bypasses
//! the countdown; the stale heap entry is skipped later.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use events::{PeerRef, WireNote};

use crate::identity::{LocalUser, normalize_peer_color};

use super::ExpiryQueue;

pub const NOTE_LIFETIME: Duration = Duration::from_secs(10);

/// A rendered sticky note.
#[derive(Clone, Debug, Serialize)]
pub struct StickyNote {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub author_name: String,
    pub color: String,
    pub body: String,
    /// Locally created notes can be deleted by this session.
    pub mine: bool,
    #[serde(skip)]
    pub expires_at: Instant,
}

pub struct NoteBoard {
    notes: HashMap<String, StickyNote>,
    expiry: ExpiryQueue,
}

impl NoteBoard {
    #[must_use]
    pub fn new() -> Self {
        Self { notes: HashMap::new(), expiry: ExpiryQueue::new() }
    }

    /// Place a note locally. Renders immediately, starts the countdown, and
    /// returns the wire form for the engine to persist and broadcast.
    pub fn place(&mut self, local: &LocalUser, x: f64, y: f64, body: &str, now: Instant) -> WireNote {
        let id = Uuid::new_v4().to_string();
        let expires_at = now + NOTE_LIFETIME;
        self.notes.insert(
            id.clone(),
            StickyNote {
                id: id.clone(),
                x,
                y,
                author_name: local.name.clone(),
                color: local.color.clone(),
                body: body.to_owned(),
                mine: true,
                expires_at,
            },
        );
        self.expiry.schedule(id.clone(), expires_at);
        WireNote { id, x, y, body: body.to_owned() }
    }

    /// Render a peer's note. The countdown starts now, on this peer, not on
    /// the author's clock.
    pub fn receive(&mut self, sender: &PeerRef, note: &WireNote, now: Instant) {
        let expires_at = now + NOTE_LIFETIME;
        self.notes.insert(
            note.id.clone(),
            StickyNote {
                id: note.id.clone(),
                x: note.x,
                y: note.y,
                author_name: sender.name.clone(),
                color: normalize_peer_color(&sender.color, &sender.id),
                body: note.body.clone(),
                mine: false,
                expires_at,
            },
        );
        self.expiry.schedule(note.id.clone(), expires_at);
    }

    /// Remove a note immediately, bypassing its countdown. Covers both the
    /// local delete action and an inbound `note-deleted`.
    pub fn remove(&mut self, note_id: &str) -> bool {
        self.notes.remove(note_id).is_some()
    }

    /// Destroy every note whose countdown has elapsed. Returns the removed
    /// ids.
    pub fn expire_due(&mut self, now: Instant) -> Vec<String> {
        let due = self.expiry.pop_due(now, |id| self.notes.contains_key(id));
        for id in &due {
            self.notes.remove(id);
        }
        due
    }

    /// When the engine should next wake for a note expiry.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.expiry.next_deadline(|id| self.notes.contains_key(id))
    }

    #[must_use]
    pub fn get(&self, note_id: &str) -> Option<&StickyNote> {
        self.notes.get(note_id)
    }

    pub fn notes(&self) -> impl Iterator<Item = &StickyNote> {
        self.notes.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

impl Default for NoteBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "notes_test.rs"]
mod tests;
