//! Widget session state.
//!
//! DESIGN
//! ======
//! One explicit struct owns every piece of mutable state for a session:
//! identity, link status, the dedup cache, presence, chat, and both
//! annotation boards. The engine task is its sole owner. Handlers borrow
//! it, mutate, and return within one loop iteration, so there are no locks
//! and no module-level singletons anywhere.
//!
//! Hosts never touch this struct. They receive [`WidgetSnapshot`], a plain
//! serializable render view rebuilt on demand.

use serde::Serialize;

use crate::annotations::{AnnotationModes, Drawing, DrawingBoard, NoteBoard, StickyNote};
use crate::chat::{ChatMessage, ChatPane, ChatTab, SUPPORT_PSEUDO_USER, TabUnread};
use crate::dedup::DedupCache;
use crate::identity::LocalUser;
use crate::presence::{AvatarDock, PresenceTracker};
use crate::store::{ConversationHead, TicketSummary};

const MAX_NOTICES: usize = 5;

// =============================================================================
// LINK STATUS
// =============================================================================

/// Where the realtime link currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Connecting,
    Up,
    /// Temporarily lost; the transport is reconnecting.
    Down,
    /// No transport configured, or reconnect attempts exhausted. Chat is
    /// disabled until a full reload.
    Dead,
}

// =============================================================================
// WIDGET STATE
// =============================================================================

pub struct WidgetState {
    pub local: LocalUser,
    pub page: String,
    pub link: LinkStatus,
    pub dedup: DedupCache,
    pub presence: PresenceTracker,
    pub chat: ChatPane,
    pub notes: NoteBoard,
    pub drawings: DrawingBoard,
    pub modes: AnnotationModes,
    /// Recomputed presence view, refreshed after every applied change.
    pub dock: AvatarDock,
    /// One-line user-visible notices (failed saves and the like), newest
    /// last, capped.
    pub notices: Vec<String>,
    /// Bumped once per applied change; published to hosts via the engine's
    /// watch channel.
    pub revision: u64,
}

impl WidgetState {
    #[must_use]
    pub fn new(local: LocalUser, page: impl Into<String>) -> Self {
        let chat = ChatPane::new(&local);
        Self {
            local,
            page: page.into(),
            link: LinkStatus::Connecting,
            dedup: DedupCache::new(),
            presence: PresenceTracker::new(),
            chat,
            notes: NoteBoard::new(),
            drawings: DrawingBoard::new(),
            modes: AnnotationModes::default(),
            dock: AvatarDock::default(),
            notices: Vec::new(),
            revision: 0,
        }
    }

    /// Recompute derived views. Idempotent; called unconditionally after
    /// every dispatched event.
    pub fn refresh_views(&mut self) {
        self.dock = self.presence.dock();
    }

    pub fn push_notice(&mut self, text: impl Into<String>) {
        self.notices.push(text.into());
        if self.notices.len() > MAX_NOTICES {
            self.notices.remove(0);
        }
    }

    /// Build the host-facing render view.
    #[must_use]
    pub fn snapshot(&self) -> WidgetSnapshot {
        let mut cursors: Vec<CursorView> = self
            .presence
            .visible_cursors()
            .map(|entity| CursorView {
                user_id: entity.user_id.clone(),
                name: entity.name.clone(),
                color: entity.color.clone(),
                x: entity.x,
                y: entity.y,
            })
            .collect();
        cursors.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        let mut notes: Vec<StickyNote> = self.notes.notes().cloned().collect();
        notes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut drawings: Vec<Drawing> = self.drawings.drawings().cloned().collect();
        drawings.sort_by(|a, b| a.id.cmp(&b.id));

        WidgetSnapshot {
            revision: self.revision,
            link: self.link,
            page: self.page.clone(),
            user_id: self.local.id.clone(),
            dock: self.dock.clone(),
            cursors,
            drawer_open: self.chat.drawer_open,
            active_tab: self.chat.active_tab,
            badge: self.chat.badge,
            unread: self.chat.unread,
            messages: self.chat.active_messages().to_vec(),
            support_partner: SUPPORT_PSEUDO_USER.to_owned(),
            friends: self.chat.friend_heads().to_vec(),
            tickets: self.chat.tickets().to_vec(),
            selected_friend: self.chat.selected_friend.clone(),
            selected_ticket: self.chat.selected_ticket.clone(),
            notes,
            drawings,
            modes: self.modes,
            notices: self.notices.clone(),
        }
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// A remote cursor to draw.
#[derive(Clone, Debug, Serialize)]
pub struct CursorView {
    pub user_id: String,
    pub name: String,
    pub color: String,
    pub x: f64,
    pub y: f64,
}

/// Everything a host needs to render the widget.
#[derive(Clone, Debug, Serialize)]
pub struct WidgetSnapshot {
    pub revision: u64,
    pub link: LinkStatus,
    pub page: String,
    pub user_id: String,
    pub dock: AvatarDock,
    pub cursors: Vec<CursorView>,
    pub drawer_open: bool,
    pub active_tab: ChatTab,
    pub badge: u32,
    pub unread: TabUnread,
    /// Messages of the active tab's visible conversation.
    pub messages: Vec<ChatMessage>,
    /// Display name of the end-user support counterpart.
    pub support_partner: String,
    pub friends: Vec<ConversationHead>,
    pub tickets: Vec<TicketSummary>,
    pub selected_friend: Option<String>,
    pub selected_ticket: Option<String>,
    pub notes: Vec<StickyNote>,
    pub drawings: Vec<Drawing>,
    pub modes: AnnotationModes,
    pub notices: Vec<String>,
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use events::PeerRef;

    /// State for a plain end-user session on `/`.
    #[must_use]
    pub fn test_state() -> WidgetState {
        WidgetState::new(LocalUser::new("local-1", "Me", false), "/")
    }

    /// State for an admin session on `/`.
    #[must_use]
    pub fn test_admin_state() -> WidgetState {
        WidgetState::new(LocalUser::new("admin-1", "Agent", true), "/")
    }

    #[must_use]
    pub fn test_peer(id: &str, name: &str) -> PeerRef {
        PeerRef { id: id.into(), name: name.into(), color: "#2ec4b6".into() }
    }
}
