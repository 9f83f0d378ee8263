//! Presence and cursor tracking.
//!
//! LIFECYCLE
//! =========
//! Every remote peer runs `ABSENT -> ACTIVE -> STALE -> ABSENT` driven by two
//! clocks:
//! - 8 seconds without an update hides the cursor glyph (swept every 10s);
//!   the avatar chip stays.
//! - 300 seconds without an update removes the peer entirely (swept every
//!   60s) and the dock recomputes.
//!
//! `cursor-leave` hides the glyph immediately, `user-left` removes the peer
//! immediately; the sweeps are the fallback for peers that vanish without
//! saying goodbye.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use events::PeerRef;

use crate::identity::normalize_peer_color;

pub const CURSOR_HIDE_AFTER: Duration = Duration::from_secs(8);
pub const CURSOR_HIDE_SWEEP: Duration = Duration::from_secs(10);
pub const PRESENCE_REMOVE_AFTER: Duration = Duration::from_secs(300);
pub const PRESENCE_REMOVE_SWEEP: Duration = Duration::from_secs(60);
pub const DOCK_MAX_CHIPS: usize = 5;

// =============================================================================
// CURSOR ENTITY
// =============================================================================

/// One remote peer's live cursor.
#[derive(Clone, Debug)]
pub struct CursorEntity {
    pub user_id: String,
    pub name: String,
    pub color: String,
    pub x: f64,
    pub y: f64,
    /// Whether the cursor glyph is drawn. The avatar chip ignores this.
    pub visible: bool,
    pub last_seen: Instant,
}

// =============================================================================
// AVATAR DOCK
// =============================================================================

/// Host-facing "who is here" strip: most recently active peers first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AvatarDock {
    pub chips: Vec<DockChip>,
    /// How many present peers did not fit in the strip.
    pub overflow: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DockChip {
    pub user_id: String,
    pub name: String,
    pub color: String,
}

// =============================================================================
// TRACKER
// =============================================================================

#[derive(Default)]
pub struct PresenceTracker {
    peers: HashMap<String, CursorEntity>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self { peers: HashMap::new() }
    }

    /// Apply a `cursor-move`. First sight of a peer creates the entity;
    /// afterwards the position and clock update in place. Moving always
    /// re-reveals a hidden cursor.
    pub fn observe_cursor(&mut self, peer: &PeerRef, x: f64, y: f64, now: Instant) {
        let entity = self.entry(peer, now);
        entity.x = x;
        entity.y = y;
        entity.visible = true;
        entity.last_seen = now;
    }

    /// Apply a `user-joined`. The peer appears in the dock with the cursor
    /// hidden until its first move.
    pub fn observe_presence(&mut self, peer: &PeerRef, now: Instant) {
        let entity = self.entry(peer, now);
        entity.last_seen = now;
        entity.name.clone_from(&peer.name);
    }

    /// Apply a `cursor-leave`: hide the glyph, keep the chip.
    pub fn mark_left(&mut self, user_id: &str) {
        if let Some(entity) = self.peers.get_mut(user_id) {
            entity.visible = false;
        }
    }

    /// Apply a `user-left`: drop the peer entirely. Returns whether it was
    /// known.
    pub fn remove(&mut self, user_id: &str) -> bool {
        self.peers.remove(user_id).is_some()
    }

    /// 10-second sweep: hide cursors idle past [`CURSOR_HIDE_AFTER`].
    /// Returns whether anything changed.
    pub fn sweep_hide(&mut self, now: Instant) -> bool {
        let mut changed = false;
        for entity in self.peers.values_mut() {
            if entity.visible && now.duration_since(entity.last_seen) > CURSOR_HIDE_AFTER {
                entity.visible = false;
                changed = true;
            }
        }
        changed
    }

    /// 60-second sweep: remove peers idle past [`PRESENCE_REMOVE_AFTER`].
    /// Returns whether the dock must recompute.
    pub fn sweep_remove(&mut self, now: Instant) -> bool {
        let before = self.peers.len();
        self.peers
            .retain(|_, entity| now.duration_since(entity.last_seen) <= PRESENCE_REMOVE_AFTER);
        self.peers.len() != before
    }

    /// Recompute the avatar dock: newest activity first, at most
    /// [`DOCK_MAX_CHIPS`] chips, the rest folded into the overflow count.
    #[must_use]
    pub fn dock(&self) -> AvatarDock {
        let mut entities: Vec<&CursorEntity> = self.peers.values().collect();
        entities.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });

        let overflow = entities.len().saturating_sub(DOCK_MAX_CHIPS);
        let chips = entities
            .into_iter()
            .take(DOCK_MAX_CHIPS)
            .map(|entity| DockChip {
                user_id: entity.user_id.clone(),
                name: entity.name.clone(),
                color: entity.color.clone(),
            })
            .collect();

        AvatarDock { chips, overflow }
    }

    /// Cursors to draw right now.
    pub fn visible_cursors(&self) -> impl Iterator<Item = &CursorEntity> {
        self.peers.values().filter(|entity| entity.visible)
    }

    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&CursorEntity> {
        self.peers.get(user_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn entry(&mut self, peer: &PeerRef, now: Instant) -> &mut CursorEntity {
        self.peers
            .entry(peer.id.clone())
            .or_insert_with(|| CursorEntity {
                user_id: peer.id.clone(),
                name: peer.name.clone(),
                color: normalize_peer_color(&peer.color, &peer.id),
                x: 0.0,
                y: 0.0,
                visible: false,
                last_seen: now,
            })
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
