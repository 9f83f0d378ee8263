//! Chat state machine: tabs, unread counters, conversations, tickets.
//!
//! DESIGN
//! ======
//! Three mutually exclusive tabs: the public web room, 1:1 friend chat, and
//! support. Switching tabs clears the destination tab's counter and its
//! visible message list, then reloads from the durable store; the transport
//! is untouched. Support splits by role: end-users hold one conversation
//! with the fixed `support` pseudo-user, admin sessions hold a ticket list
//! with one thread per end-user.
//!
//! UNREAD RULES
//! ============
//! The drawer badge counts any message appended while the drawer is closed,
//! the author's own sends included. Per-tab counters count only inbound
//! messages from peers, and skip the tab the user is actually looking at
//! (drawer open and that tab active). Opening the drawer zeroes the badge
//! and all three counters; switching tabs zeroes the destination only.
//!
//! STALENESS
//! =========
//! Tab switches and conversation selections bump a load generation. History
//! responses carry the generation they were issued under; anything older
//! than the current one is discarded, so a slow load for a tab the user
//! already left can never paint the wrong view.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use events::{Envelope, Event, PeerRef, WireMessage, synthesized_dedupe_key};

use crate::identity::{LocalUser, color_for_id, normalize_peer_color};
use crate::store::{ConversationHead, StoredMessage, TicketSummary};

/// Fixed pseudo-user every end-user support conversation is held with.
pub const SUPPORT_PSEUDO_USER: &str = "support";

// =============================================================================
// MESSAGE TYPES
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatTab {
    Web,
    Friend,
    Support,
}

/// Which logical channel a message belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelTag {
    Web,
    Friend,
    Support,
    AdminReply,
}

/// A rendered chat message. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_color: String,
    pub body: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub channel: ChannelTag,
    #[serde(skip)]
    pub dedupe_key: Option<String>,
}

/// One conversation thread: time-ordered messages plus its own unread count.
#[derive(Debug, Default)]
pub struct Conversation {
    pub messages: Vec<ChatMessage>,
    pub unread: u32,
    pub last_activity: i64,
}

impl Conversation {
    fn append(&mut self, message: ChatMessage) {
        self.last_activity = self.last_activity.max(message.created_at);
        // Insert keeping created_at order; equal stamps keep arrival order.
        let at = self
            .messages
            .iter()
            .rposition(|m| m.created_at <= message.created_at)
            .map_or(0, |i| i + 1);
        self.messages.insert(at, message);
    }

    fn replace(&mut self, mut messages: Vec<ChatMessage>) {
        messages.sort_by_key(|m| m.created_at);
        self.last_activity = messages.iter().map(|m| m.created_at).max().unwrap_or(0);
        self.messages = messages;
    }

    fn remove(&mut self, message_id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != message_id);
        self.messages.len() != before
    }
}

// =============================================================================
// UNREAD COUNTERS
// =============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TabUnread {
    pub web: u32,
    pub friend: u32,
    pub support: u32,
}

// =============================================================================
// LOADS AND SENDS
// =============================================================================

/// A history load the engine must issue after a tab or selection change.
/// Carries the generation the response must present to be applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadRequest {
    WebHistory { generation: u64 },
    Conversations { generation: u64 },
    FriendHistory { generation: u64, peer_id: String },
    SupportHistory { generation: u64 },
    AdminTickets { generation: u64 },
    TicketHistory { generation: u64, user_id: String },
}

/// What the engine does after an optimistic send: broadcast the envelope,
/// then issue the durable save.
#[derive(Clone, Debug, PartialEq)]
pub struct SendPlan {
    pub envelope: Envelope,
    pub save: SaveTarget,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveTarget {
    Web { body: String },
    Friend { peer_id: String, body: String },
    Support { body: String },
    AdminReply { target_user_id: String, body: String },
}

// =============================================================================
// CHAT PANE
// =============================================================================

pub struct ChatPane {
    local: PeerRef,
    is_admin: bool,

    pub drawer_open: bool,
    pub active_tab: ChatTab,
    /// Drawer-level unread badge.
    pub badge: u32,
    pub unread: TabUnread,

    web: Conversation,
    friends: HashMap<String, Conversation>,
    friend_heads: Vec<ConversationHead>,
    pub selected_friend: Option<String>,
    /// End-user side of support.
    support: Conversation,
    /// Admin side of support.
    tickets: Vec<TicketSummary>,
    ticket_threads: HashMap<String, Conversation>,
    pub selected_ticket: Option<String>,

    generation: u64,
}

impl ChatPane {
    #[must_use]
    pub fn new(local: &LocalUser) -> Self {
        Self {
            local: local.peer_ref(),
            is_admin: local.is_admin,
            drawer_open: false,
            active_tab: ChatTab::Web,
            badge: 0,
            unread: TabUnread::default(),
            web: Conversation::default(),
            friends: HashMap::new(),
            friend_heads: Vec::new(),
            selected_friend: None,
            support: Conversation::default(),
            tickets: Vec::new(),
            ticket_threads: HashMap::new(),
            selected_ticket: None,
            generation: 0,
        }
    }

    // -- drawer and tabs ----------------------------------------------------

    /// Open the drawer: badge and all three tab counters reset at once.
    pub fn open_drawer(&mut self) {
        self.drawer_open = true;
        self.badge = 0;
        self.unread = TabUnread::default();
    }

    pub fn close_drawer(&mut self) {
        self.drawer_open = false;
    }

    /// Switch tabs: zero the destination counter only, drop the selection
    /// and the visible list, and tell the engine what to load.
    pub fn switch_tab(&mut self, tab: ChatTab) -> LoadRequest {
        self.active_tab = tab;
        self.selected_friend = None;
        self.selected_ticket = None;
        let generation = self.bump_generation();
        match tab {
            ChatTab::Web => {
                self.unread.web = 0;
                self.web.messages.clear();
                LoadRequest::WebHistory { generation }
            }
            ChatTab::Friend => {
                self.unread.friend = 0;
                LoadRequest::Conversations { generation }
            }
            ChatTab::Support => {
                self.unread.support = 0;
                if self.is_admin {
                    LoadRequest::AdminTickets { generation }
                } else {
                    self.support.messages.clear();
                    LoadRequest::SupportHistory { generation }
                }
            }
        }
    }

    pub fn select_friend(&mut self, peer_id: &str) -> LoadRequest {
        self.selected_friend = Some(peer_id.to_owned());
        self.friends.entry(peer_id.to_owned()).or_default().unread = 0;
        let generation = self.bump_generation();
        LoadRequest::FriendHistory { generation, peer_id: peer_id.to_owned() }
    }

    /// Admin only. Clears the ticket's unread flag; the engine also tells
    /// the store the ticket was read.
    pub fn select_ticket(&mut self, user_id: &str) -> Option<LoadRequest> {
        if !self.is_admin {
            return None;
        }
        self.selected_ticket = Some(user_id.to_owned());
        if let Some(ticket) = self.tickets.iter_mut().find(|t| t.user_id == user_id) {
            ticket.unread = false;
        }
        let generation = self.bump_generation();
        Some(LoadRequest::TicketHistory { generation, user_id: user_id.to_owned() })
    }

    // -- sending ------------------------------------------------------------

    /// Optimistic send for the active tab. Appends locally, bumps the badge
    /// when the drawer is closed, and returns the broadcast plus the durable
    /// save for the engine to carry out. `None` when there is nothing to
    /// send: empty body, or no conversation selected on the friend/ticket
    /// views.
    pub fn send(&mut self, body: &str, now_ms: i64) -> Option<SendPlan> {
        let body = body.trim();
        if body.is_empty() {
            return None;
        }

        let id = local_message_id(now_ms);
        let dedupe_key = synthesized_dedupe_key(&self.local.id, body, now_ms);
        let wire = WireMessage {
            id: id.clone(),
            body: body.to_owned(),
            created_at: now_ms,
            dedupe_key: Some(dedupe_key.clone()),
        };
        let message = ChatMessage {
            id,
            author_id: self.local.id.clone(),
            author_name: self.local.name.clone(),
            author_color: self.local.color.clone(),
            body: body.to_owned(),
            created_at: now_ms,
            channel: ChannelTag::Web,
            dedupe_key: Some(dedupe_key),
        };

        let (event, save) = match self.active_tab {
            ChatTab::Web => {
                self.web.append(message);
                (Event::NewMessage(wire), SaveTarget::Web { body: body.to_owned() })
            }
            ChatTab::Friend => {
                let peer_id = self.selected_friend.clone()?;
                let message = ChatMessage { channel: ChannelTag::Friend, ..message };
                self.friends.entry(peer_id.clone()).or_default().append(message);
                self.touch_friend_head(&peer_id, None, now_ms);
                (
                    Event::IndividualMessage { message: wire, recipient_id: peer_id.clone() },
                    SaveTarget::Friend { peer_id, body: body.to_owned() },
                )
            }
            ChatTab::Support if self.is_admin => {
                let target = self.selected_ticket.clone()?;
                let message = ChatMessage { channel: ChannelTag::AdminReply, ..message };
                let body_text = message.body.clone();
                self.ticket_threads.entry(target.clone()).or_default().append(message);
                if let Some(ticket) = self.tickets.iter_mut().find(|t| t.user_id == target) {
                    ticket.last_message = body_text;
                    ticket.last_activity = now_ms;
                    ticket.message_count += 1;
                }
                (
                    Event::AdminSupportReply { message: wire, target_user_id: target.clone() },
                    SaveTarget::AdminReply { target_user_id: target, body: body.to_owned() },
                )
            }
            ChatTab::Support => {
                let message = ChatMessage { channel: ChannelTag::Support, ..message };
                self.support.append(message);
                (Event::SupportMessage(wire), SaveTarget::Support { body: body.to_owned() })
            }
        };

        if !self.drawer_open {
            self.badge += 1;
        }

        let envelope = Envelope { sender: Some(self.local.clone()), page: None, event };
        Some(SendPlan { envelope, save })
    }

    // -- inbound ------------------------------------------------------------

    /// Public room message from a peer.
    pub fn record_web_message(&mut self, sender: &PeerRef, msg: &WireMessage) {
        self.web.append(wire_to_message(sender, msg, ChannelTag::Web));
        self.note_inbound(ChatTab::Web);
    }

    /// 1:1 message. Every peer on the channel sees it; only the addressed
    /// recipient renders it.
    pub fn record_individual_message(
        &mut self,
        sender: &PeerRef,
        msg: &WireMessage,
        recipient_id: &str,
    ) {
        if recipient_id != self.local.id {
            return;
        }
        let viewing = self.drawer_open
            && self.active_tab == ChatTab::Friend
            && self.selected_friend.as_deref() == Some(sender.id.as_str());

        let convo = self.friends.entry(sender.id.clone()).or_default();
        convo.append(wire_to_message(sender, msg, ChannelTag::Friend));
        if !viewing {
            convo.unread += 1;
        }
        self.touch_friend_head(&sender.id, Some(&sender.name), msg.created_at);
        self.note_inbound(ChatTab::Friend);
    }

    /// Support request from an end-user. Only admin sessions consume these;
    /// end-users never see other users' support traffic.
    pub fn record_support_message(&mut self, sender: &PeerRef, msg: &WireMessage) {
        if !self.is_admin {
            return;
        }
        let viewing = self.drawer_open
            && self.active_tab == ChatTab::Support
            && self.selected_ticket.as_deref() == Some(sender.id.as_str());

        self.ticket_threads
            .entry(sender.id.clone())
            .or_default()
            .append(wire_to_message(sender, msg, ChannelTag::Support));
        self.touch_ticket(sender, &msg.body, msg.created_at, !viewing);
        self.note_inbound(ChatTab::Support);
    }

    /// Admin reply addressed to one end-user. The addressed user renders it
    /// into their support conversation; other end-users drop it. Admin
    /// sessions mirror it into the ticket thread so two dashboards stay
    /// coherent.
    pub fn record_admin_reply(
        &mut self,
        sender: &PeerRef,
        msg: &WireMessage,
        target_user_id: &str,
    ) {
        if self.is_admin {
            self.ticket_threads
                .entry(target_user_id.to_owned())
                .or_default()
                .append(wire_to_message(sender, msg, ChannelTag::AdminReply));
            if let Some(ticket) = self.tickets.iter_mut().find(|t| t.user_id == target_user_id) {
                ticket.last_message.clone_from(&msg.body);
                ticket.last_activity = ticket.last_activity.max(msg.created_at);
                ticket.message_count += 1;
            }
            self.note_inbound(ChatTab::Support);
            return;
        }
        if target_user_id != self.local.id {
            return;
        }
        self.support.append(wire_to_message(sender, msg, ChannelTag::AdminReply));
        self.note_inbound(ChatTab::Support);
    }

    /// Remove a deleted message from every store it appears in.
    pub fn message_deleted(&mut self, message_id: &str) -> bool {
        let mut removed = self.web.remove(message_id);
        removed |= self.support.remove(message_id);
        for convo in self.friends.values_mut() {
            removed |= convo.remove(message_id);
        }
        for thread in self.ticket_threads.values_mut() {
            removed |= thread.remove(message_id);
        }
        removed
    }

    // -- history application (staleness-guarded) ----------------------------

    /// Apply a web history response. Returns `false` when the response is
    /// stale and was discarded. Same contract for the other `apply_*`.
    pub fn apply_web_history(&mut self, generation: u64, rows: Vec<StoredMessage>) -> bool {
        if generation != self.generation {
            return false;
        }
        self.web.replace(stored_to_messages(rows, ChannelTag::Web));
        true
    }

    pub fn apply_conversations(&mut self, generation: u64, mut heads: Vec<ConversationHead>) -> bool {
        if generation != self.generation {
            return false;
        }
        heads.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        self.friend_heads = heads;
        true
    }

    pub fn apply_friend_history(
        &mut self,
        generation: u64,
        peer_id: &str,
        rows: Vec<StoredMessage>,
    ) -> bool {
        if generation != self.generation {
            return false;
        }
        self.friends
            .entry(peer_id.to_owned())
            .or_default()
            .replace(stored_to_messages(rows, ChannelTag::Friend));
        true
    }

    pub fn apply_support_history(&mut self, generation: u64, rows: Vec<StoredMessage>) -> bool {
        if generation != self.generation {
            return false;
        }
        self.support.replace(stored_to_messages(rows, ChannelTag::Support));
        true
    }

    pub fn apply_tickets(&mut self, generation: u64, mut tickets: Vec<TicketSummary>) -> bool {
        if generation != self.generation {
            return false;
        }
        tickets.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        self.tickets = tickets;
        true
    }

    pub fn apply_ticket_history(
        &mut self,
        generation: u64,
        user_id: &str,
        rows: Vec<StoredMessage>,
    ) -> bool {
        if generation != self.generation {
            return false;
        }
        self.ticket_threads
            .entry(user_id.to_owned())
            .or_default()
            .replace(stored_to_messages(rows, ChannelTag::Support));
        true
    }

    // -- views --------------------------------------------------------------

    /// Messages the active tab renders right now.
    #[must_use]
    pub fn active_messages(&self) -> &[ChatMessage] {
        match self.active_tab {
            ChatTab::Web => &self.web.messages,
            ChatTab::Friend => self
                .selected_friend
                .as_ref()
                .and_then(|id| self.friends.get(id))
                .map_or(&[], |convo| convo.messages.as_slice()),
            ChatTab::Support if self.is_admin => self
                .selected_ticket
                .as_ref()
                .and_then(|id| self.ticket_threads.get(id))
                .map_or(&[], |thread| thread.messages.as_slice()),
            ChatTab::Support => &self.support.messages,
        }
    }

    #[must_use]
    pub fn friend_heads(&self) -> &[ConversationHead] {
        &self.friend_heads
    }

    #[must_use]
    pub fn friend_thread(&self, peer_id: &str) -> Option<&Conversation> {
        self.friends.get(peer_id)
    }

    #[must_use]
    pub fn tickets(&self) -> &[TicketSummary] {
        &self.tickets
    }

    #[must_use]
    pub fn ticket_thread(&self, user_id: &str) -> Option<&Conversation> {
        self.ticket_threads.get(user_id)
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // -- internals ----------------------------------------------------------

    fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Inbound-message accounting: badge while closed, tab counter unless
    /// the user is looking at that tab.
    fn note_inbound(&mut self, tab: ChatTab) {
        if !self.drawer_open {
            self.badge += 1;
        }
        if self.drawer_open && self.active_tab == tab {
            return;
        }
        match tab {
            ChatTab::Web => self.unread.web += 1,
            ChatTab::Friend => self.unread.friend += 1,
            ChatTab::Support => self.unread.support += 1,
        }
    }

    fn touch_friend_head(&mut self, peer_id: &str, peer_name: Option<&str>, at: i64) {
        if let Some(head) = self.friend_heads.iter_mut().find(|h| h.peer_id == peer_id) {
            head.last_activity = head.last_activity.max(at);
            if let Some(name) = peer_name {
                head.peer_name = name.to_owned();
            }
        } else {
            self.friend_heads.push(ConversationHead {
                peer_id: peer_id.to_owned(),
                peer_name: peer_name.unwrap_or(peer_id).to_owned(),
                last_activity: at,
            });
        }
        self.friend_heads.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    }

    fn touch_ticket(&mut self, sender: &PeerRef, body: &str, at: i64, unread: bool) {
        if let Some(ticket) = self.tickets.iter_mut().find(|t| t.user_id == sender.id) {
            ticket.last_message = body.to_owned();
            ticket.last_activity = ticket.last_activity.max(at);
            ticket.message_count += 1;
            if unread {
                ticket.unread = true;
            }
        } else {
            self.tickets.push(TicketSummary {
                user_id: sender.id.clone(),
                user_name: sender.name.clone(),
                last_message: body.to_owned(),
                last_activity: at,
                unread,
                message_count: 1,
            });
        }
        self.tickets.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Client-generated id for an optimistic send: timestamp plus a short
/// random suffix.
fn local_message_id(now_ms: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{now_ms}-{}", &suffix[..8])
}

fn wire_to_message(sender: &PeerRef, msg: &WireMessage, channel: ChannelTag) -> ChatMessage {
    ChatMessage {
        id: msg.id.clone(),
        author_id: sender.id.clone(),
        author_name: sender.name.clone(),
        author_color: normalize_peer_color(&sender.color, &sender.id),
        body: msg.body.clone(),
        created_at: msg.created_at,
        channel,
        dedupe_key: msg.dedupe_key.clone(),
    }
}

fn stored_to_messages(rows: Vec<StoredMessage>, channel: ChannelTag) -> Vec<ChatMessage> {
    rows.into_iter()
        .map(|row| {
            let author_color = if row.author_color.is_empty() {
                color_for_id(&row.author_id).to_owned()
            } else {
                normalize_peer_color(&row.author_color, &row.author_id)
            };
            let dedupe_key = Some(synthesized_dedupe_key(&row.author_id, &row.body, row.created_at));
            ChatMessage {
                id: row.id,
                author_id: row.author_id,
                author_name: row.author_name,
                author_color,
                body: row.body,
                created_at: row.created_at,
                channel,
                dedupe_key,
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
