//! Widget engine: one task owning all session state.
//!
//! DESIGN
//! ======
//! Everything that can change [`WidgetState`] arrives as a message on one
//! select loop: host commands, decoded link events, store responses, sweep
//! ticks, and annotation expiry deadlines. Each arm runs to completion
//! before the next is polled, so there is exactly one writer and no locks.
//! Anything slow (history loads, durable saves) runs on a spawned task and
//! reports back through the same loop as a [`StoreReply`].
//!
//! LIFECYCLE
//! =========
//! [`Engine::spawn`] builds the state, starts the transport task, and
//! detaches the engine. The returned [`Widget`] is the host's only handle:
//! a command sender plus a watch channel that ticks on every applied
//! change. Dropping the `Widget` (or sending [`Command::Shutdown`]) ends
//! the loop, which announces the departure and closes the transport.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use events::{Envelope, Event};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::annotations::ClickTarget;
use crate::chat::{ChatPane, ChatTab, LoadRequest, SaveTarget};
use crate::config::WidgetConfig;
use crate::dedup::DEDUP_TRIM_INTERVAL;
use crate::identity::{GuestIdentity, LocalUser, validate_guest};
use crate::presence::{CURSOR_HIDE_SWEEP, PRESENCE_REMOVE_SWEEP};
use crate::router::{self, RouteOutcome};
use crate::state::{LinkStatus, WidgetSnapshot, WidgetState};
use crate::store::{ConversationHead, HistoryPage, StoreClient, StoreError, StoredMessage, TicketSummary};
use crate::transport::{self, LinkEvent, Transport};

/// Commands and store replies share this depth; a host that outruns it
/// backpressures on `send`.
const COMMAND_DEPTH: usize = 64;

/// Public room channel in the store.
const WEB_CHANNEL: &str = "web";

// =============================================================================
// COMMANDS
// =============================================================================

/// Everything a host shell can ask the engine to do.
#[derive(Debug)]
pub enum Command {
    OpenDrawer,
    CloseDrawer,
    SwitchTab(ChatTab),
    /// Open a 1:1 conversation with this peer.
    SelectFriend(String),
    /// Admin only: open the ticket for this end-user.
    SelectTicket(String),
    /// Send on whatever tab is active.
    SendMessage(String),
    CursorMoved { x: f64, y: f64 },
    /// Page became visible (`true`) or hidden (`false`).
    VisibilityChanged(bool),
    SetNotesMode(bool),
    SetDrawMode(bool),
    /// A click the host classified, plus the note text composed for it.
    /// Ignored unless notes mode is armed and the click hit bare page.
    PageClick { target: ClickTarget, note_body: String },
    StrokeStart { x: f64, y: f64 },
    StrokePoint { x: f64, y: f64 },
    StrokeEnd,
    DeleteNote(String),
    RegisterGuest { name: String, email: String },
    /// Reply with the current render view.
    Snapshot(oneshot::Sender<WidgetSnapshot>),
    Shutdown,
}

// =============================================================================
// HOST HANDLE
// =============================================================================

/// The host's side of a running engine.
pub struct Widget {
    commands: mpsc::Sender<Command>,
    revision: watch::Receiver<u64>,
}

impl Widget {
    /// Send one command. Returns `false` if the engine is gone.
    pub async fn command(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Fetch the current render view. `None` if the engine is gone.
    pub async fn snapshot(&self) -> Option<WidgetSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Snapshot(tx)).await.ok()?;
        rx.await.ok()
    }

    /// Watch channel that ticks on every applied change. Hosts await
    /// `changed()` and re-render from [`Widget::snapshot`].
    #[must_use]
    pub fn revision(&self) -> watch::Receiver<u64> {
        self.revision.clone()
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

// =============================================================================
// STORE REPLIES
// =============================================================================

/// What a spawned store task reports back into the loop.
enum StoreReply {
    WebHistory { generation: u64, result: Result<HistoryPage, StoreError> },
    Conversations { generation: u64, result: Result<Vec<ConversationHead>, StoreError> },
    FriendHistory { generation: u64, peer_id: String, result: Result<Vec<StoredMessage>, StoreError> },
    SupportHistory { generation: u64, result: Result<Vec<StoredMessage>, StoreError> },
    Tickets { generation: u64, result: Result<Vec<TicketSummary>, StoreError> },
    TicketHistory { generation: u64, user_id: String, result: Result<Vec<StoredMessage>, StoreError> },
    /// A durable save failed after the optimistic render already happened.
    SaveFailed { what: &'static str },
}

// =============================================================================
// ENGINE
// =============================================================================

pub struct Engine {
    state: WidgetState,
    store: Option<StoreClient>,
    transport: Option<Box<dyn Transport>>,
    commands: mpsc::Receiver<Command>,
    /// `None` once the transport task is gone; the select arm then parks.
    link: Option<mpsc::Receiver<LinkEvent>>,
    replies_tx: mpsc::Sender<StoreReply>,
    replies: mpsc::Receiver<StoreReply>,
    revision_tx: watch::Sender<u64>,
    guest_cache_path: std::path::PathBuf,
}

impl Engine {
    /// Start a widget session and hand back the host handle.
    #[must_use]
    pub fn spawn(config: WidgetConfig) -> Widget {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_DEPTH);
        let (replies_tx, replies_rx) = mpsc::channel(COMMAND_DEPTH);
        let (revision_tx, revision_rx) = watch::channel(0);

        let store = config.store.and_then(|cfg| {
            match StoreClient::new(&cfg.base_url, &cfg.token) {
                Ok(client) => Some(client),
                Err(error) => {
                    warn!(%error, "store unavailable, running without history");
                    None
                }
            }
        });

        let mut state = WidgetState::new(config.user, config.page);
        let (transport, link) = match config.transport {
            Some(selected) => {
                let (handle, link_rx) = transport::connect(selected, store.clone());
                (Some(handle), Some(link_rx))
            }
            None => {
                state.link = LinkStatus::Dead;
                state.push_notice("realtime is not configured; chat is disabled");
                (None, None)
            }
        };

        let engine = Self {
            state,
            store,
            transport,
            commands: command_rx,
            link,
            replies_tx,
            replies: replies_rx,
            revision_tx,
            guest_cache_path: config.guest_cache_path,
        };
        tokio::spawn(engine.run());

        Widget { commands: command_tx, revision: revision_rx }
    }

    async fn run(mut self) {
        info!(page = %self.state.page, user = %self.state.local.id, "widget engine running");

        let mut hide_sweep = tokio::time::interval(CURSOR_HIDE_SWEEP);
        hide_sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut remove_sweep = tokio::time::interval(PRESENCE_REMOVE_SWEEP);
        remove_sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut dedup_trim = tokio::time::interval(DEDUP_TRIM_INTERVAL);
        dedup_trim.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // The nearest note or drawing expiry, recomputed every pass.
            let deadline = self.next_annotation_deadline();

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if matches!(command, Command::Shutdown) {
                        break;
                    }
                    self.handle_command(command).await;
                }
                event = next_link(&mut self.link) => {
                    match event {
                        Some(event) => self.handle_link(event).await,
                        None => self.link = None,
                    }
                }
                Some(reply) = self.replies.recv() => {
                    self.handle_reply(reply);
                }
                _ = hide_sweep.tick() => {
                    if self.state.presence.sweep_hide(Instant::now()) {
                        self.bump_revision();
                    }
                }
                _ = remove_sweep.tick() => {
                    if self.state.presence.sweep_remove(Instant::now()) {
                        self.state.refresh_views();
                        self.bump_revision();
                    }
                }
                _ = dedup_trim.tick() => {
                    let evicted = self.state.dedup.trim();
                    if evicted > 0 {
                        debug!(evicted, "dedup cache trimmed");
                    }
                }
                () = sleep_until(deadline) => {
                    self.expire_annotations();
                }
            }
        }

        // Host is gone. Announce the departure, then drop the link.
        self.broadcast(Event::UserLeft).await;
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        info!("widget engine stopped");
    }

    // -- commands -------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::OpenDrawer => {
                self.state.chat.open_drawer();
                self.bump_revision();
            }
            Command::CloseDrawer => {
                self.state.chat.close_drawer();
                self.bump_revision();
            }
            Command::SwitchTab(tab) => {
                let request = self.state.chat.switch_tab(tab);
                self.spawn_load(request);
                self.bump_revision();
            }
            Command::SelectFriend(peer_id) => {
                let request = self.state.chat.select_friend(&peer_id);
                self.spawn_load(request);
                self.bump_revision();
            }
            Command::SelectTicket(user_id) => {
                if let Some(request) = self.state.chat.select_ticket(&user_id) {
                    self.mark_ticket_read(user_id);
                    self.spawn_load(request);
                    self.bump_revision();
                }
            }
            Command::SendMessage(body) => self.send_message(&body).await,
            Command::CursorMoved { x, y } => {
                trace!(x, y, "cursor moved");
                self.broadcast(Event::CursorMove { x, y }).await;
            }
            Command::VisibilityChanged(visible) => {
                if visible {
                    self.broadcast(Event::UserJoined).await;
                } else {
                    self.broadcast(Event::CursorLeave).await;
                }
            }
            Command::SetNotesMode(on) => {
                self.state.modes.set_notes(on);
                self.bump_revision();
            }
            Command::SetDrawMode(on) => {
                self.state.modes.set_draw(on);
                self.bump_revision();
            }
            Command::PageClick { target, note_body } => self.page_click(target, &note_body).await,
            Command::StrokeStart { x, y } => {
                if self.state.modes.draw {
                    let color = self.state.local.color.clone();
                    self.state.drawings.stroke_start(&color, x, y);
                }
            }
            Command::StrokePoint { x, y } => self.state.drawings.stroke_point(x, y),
            Command::StrokeEnd => self.stroke_end().await,
            Command::DeleteNote(note_id) => self.delete_note(note_id).await,
            Command::RegisterGuest { name, email } => self.register_guest(&name, &email).await,
            Command::Snapshot(reply) => {
                let _ = reply.send(self.state.snapshot());
            }
            // Handled in the loop before dispatch.
            Command::Shutdown => {}
        }
    }

    async fn send_message(&mut self, body: &str) {
        if self.state.link == LinkStatus::Dead {
            self.state.push_notice("chat is offline; reload the page to reconnect");
            self.bump_revision();
            return;
        }
        let Some(plan) = self.state.chat.send(body, now_ms()) else {
            return;
        };
        self.publish_envelope(&plan.envelope).await;
        self.spawn_save(plan.save);
        self.bump_revision();
    }

    async fn page_click(&mut self, target: ClickTarget, note_body: &str) {
        // Chrome clicks never place notes, armed or not.
        let ClickTarget::Page { x, y } = target else { return };
        if !self.state.modes.notes {
            return;
        }
        let body = note_body.trim();
        if body.is_empty() {
            return;
        }

        let wire = self.state.notes.place(&self.state.local, x, y, body, Instant::now());
        if let Some(store) = self.store.clone() {
            let replies = self.replies_tx.clone();
            let author = self.state.local.name.clone();
            let color = self.state.local.color.clone();
            let page = self.state.page.clone();
            let note = wire.clone();
            tokio::spawn(async move {
                let result = store
                    .create_note(&note.id, note.x, note.y, &note.body, &author, &color, &page)
                    .await;
                if let Err(error) = result {
                    warn!(%error, "note save failed");
                    let _ = replies.send(StoreReply::SaveFailed { what: "note" }).await;
                }
            });
        }
        self.broadcast(Event::NoteCreated(wire)).await;
        self.bump_revision();
    }

    async fn stroke_end(&mut self) {
        let Some(wire) = self.state.drawings.stroke_end(&self.state.local, Instant::now()) else {
            return;
        };
        if let Some(store) = self.store.clone() {
            let replies = self.replies_tx.clone();
            let page = self.state.page.clone();
            let drawing = wire.clone();
            tokio::spawn(async move {
                let result = store
                    .create_drawing(&drawing.id, &drawing.image, drawing.width, drawing.height, &page)
                    .await;
                if let Err(error) = result {
                    warn!(%error, "drawing save failed");
                    let _ = replies.send(StoreReply::SaveFailed { what: "drawing" }).await;
                }
            });
        }
        self.broadcast(Event::DrawingCreated(wire)).await;
        self.bump_revision();
    }

    async fn delete_note(&mut self, note_id: String) {
        if !self.state.notes.remove(&note_id) {
            return;
        }
        if let Some(store) = self.store.clone() {
            let replies = self.replies_tx.clone();
            let id = note_id.clone();
            tokio::spawn(async move {
                if let Err(error) = store.delete_note(&id).await {
                    warn!(%error, "note delete failed");
                    let _ = replies.send(StoreReply::SaveFailed { what: "note delete" }).await;
                }
            });
        }
        self.broadcast(Event::NoteDeleted { note_id }).await;
        self.bump_revision();
    }

    /// Swap the provisional guest for a registered one. The old identity
    /// announces its departure first so peers re-key cleanly, and the chat
    /// pane restarts under the new id.
    async fn register_guest(&mut self, name: &str, email: &str) {
        if let Err(error) = validate_guest(name, email) {
            self.state.push_notice(error.to_string());
            self.bump_revision();
            return;
        }
        let guest = GuestIdentity::generate(name.trim(), email.trim());
        if let Err(error) = guest.save(&self.guest_cache_path) {
            warn!(%error, path = %self.guest_cache_path.display(), "guest cache write failed");
        }
        if let Some(store) = self.store.clone() {
            let replies = self.replies_tx.clone();
            let registered = guest.clone();
            tokio::spawn(async move {
                let result = store
                    .register_guest(&registered.id, &registered.name, &registered.email)
                    .await;
                if let Err(error) = result {
                    warn!(%error, "guest registration failed");
                    let _ = replies.send(StoreReply::SaveFailed { what: "registration" }).await;
                }
            });
        }

        self.broadcast(Event::UserLeft).await;
        self.state.local = LocalUser::from_guest(&guest);
        self.state.chat = ChatPane::new(&self.state.local);
        self.broadcast(Event::UserJoined).await;
        let request = LoadRequest::WebHistory { generation: self.state.chat.generation() };
        self.spawn_load(request);
        info!(user = %self.state.local.id, "guest registered");
        self.bump_revision();
    }

    // -- link events ----------------------------------------------------------

    async fn handle_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Event(envelope) => {
                if let RouteOutcome::Applied = router::route(&mut self.state, &envelope, Instant::now()) {
                    self.bump_revision();
                }
            }
            LinkEvent::Up { resumed } => {
                info!(resumed, "realtime link up");
                self.state.link = LinkStatus::Up;
                self.broadcast(Event::UserJoined).await;
                if !resumed {
                    let request =
                        LoadRequest::WebHistory { generation: self.state.chat.generation() };
                    self.spawn_load(request);
                }
                self.bump_revision();
            }
            LinkEvent::Down { reason } => {
                info!(reason, "realtime link down, reconnecting");
                self.state.link = LinkStatus::Down;
                self.bump_revision();
            }
            LinkEvent::Dead => {
                warn!("realtime link dead; running degraded");
                self.state.link = LinkStatus::Dead;
                self.state.push_notice("realtime connection lost; reload the page to reconnect");
                self.bump_revision();
            }
        }
    }

    // -- store plumbing -------------------------------------------------------

    fn spawn_load(&self, request: LoadRequest) {
        let Some(store) = self.store.clone() else { return };
        let replies = self.replies_tx.clone();
        let local_id = self.state.local.id.clone();
        let page = self.state.page.clone();
        tokio::spawn(async move {
            let reply = match request {
                LoadRequest::WebHistory { generation } => StoreReply::WebHistory {
                    generation,
                    result: store.history(WEB_CHANNEL, &page, None).await,
                },
                LoadRequest::Conversations { generation } => StoreReply::Conversations {
                    generation,
                    result: store.conversations(&local_id).await,
                },
                LoadRequest::FriendHistory { generation, peer_id } => {
                    let result = store.individual_history(&local_id, &peer_id).await;
                    StoreReply::FriendHistory { generation, peer_id, result }
                }
                LoadRequest::SupportHistory { generation } => StoreReply::SupportHistory {
                    generation,
                    result: store.support_history(&local_id).await,
                },
                LoadRequest::AdminTickets { generation } => StoreReply::Tickets {
                    generation,
                    result: store.admin_tickets().await,
                },
                LoadRequest::TicketHistory { generation, user_id } => {
                    let result = store.support_history(&user_id).await;
                    StoreReply::TicketHistory { generation, user_id, result }
                }
            };
            let _ = replies.send(reply).await;
        });
    }

    fn spawn_save(&self, save: SaveTarget) {
        let Some(store) = self.store.clone() else { return };
        let replies = self.replies_tx.clone();
        let local_id = self.state.local.id.clone();
        let local_name = self.state.local.name.clone();
        tokio::spawn(async move {
            let result = match save {
                SaveTarget::Web { body } => store
                    .post_message(WEB_CHANNEL, &body, &local_id, &local_name)
                    .await
                    .map(drop),
                SaveTarget::Friend { peer_id, body } => store
                    .post_individual_message(&local_id, &peer_id, &body)
                    .await
                    .map(drop),
                SaveTarget::Support { body } => store
                    .post_support_message(&local_id, &body, "user")
                    .await
                    .map(drop),
                SaveTarget::AdminReply { target_user_id, body } => store
                    .post_admin_reply(&target_user_id, &body, &local_id, &local_name)
                    .await
                    .map(drop),
            };
            if let Err(error) = result {
                warn!(%error, "message save failed");
                let _ = replies.send(StoreReply::SaveFailed { what: "message" }).await;
            }
        });
    }

    /// Tell the store the admin opened this ticket. Failures only log; the
    /// unread flag was already cleared locally.
    fn mark_ticket_read(&self, user_id: String) {
        let Some(store) = self.store.clone() else { return };
        tokio::spawn(async move {
            if let Err(error) = store.mark_ticket_read(&user_id).await {
                warn!(%error, "ticket read marker failed");
            }
        });
    }

    fn handle_reply(&mut self, reply: StoreReply) {
        let applied = match reply {
            StoreReply::WebHistory { generation, result } => match result {
                Ok(history) => self.state.chat.apply_web_history(generation, history.messages),
                Err(error) => self.load_failed("chat history", &error),
            },
            StoreReply::Conversations { generation, result } => match result {
                Ok(heads) => self.state.chat.apply_conversations(generation, heads),
                Err(error) => self.load_failed("conversations", &error),
            },
            StoreReply::FriendHistory { generation, peer_id, result } => match result {
                Ok(rows) => self.state.chat.apply_friend_history(generation, &peer_id, rows),
                Err(error) => self.load_failed("conversation history", &error),
            },
            StoreReply::SupportHistory { generation, result } => match result {
                Ok(rows) => self.state.chat.apply_support_history(generation, rows),
                Err(error) => self.load_failed("support history", &error),
            },
            StoreReply::Tickets { generation, result } => match result {
                Ok(tickets) => self.state.chat.apply_tickets(generation, tickets),
                Err(error) => self.load_failed("tickets", &error),
            },
            StoreReply::TicketHistory { generation, user_id, result } => match result {
                Ok(rows) => self.state.chat.apply_ticket_history(generation, &user_id, rows),
                Err(error) => self.load_failed("ticket history", &error),
            },
            StoreReply::SaveFailed { what } => {
                self.state.push_notice(format!("couldn't save your {what}; it may not persist"));
                true
            }
        };
        if applied {
            self.bump_revision();
        }
    }

    fn load_failed(&mut self, what: &str, error: &StoreError) -> bool {
        warn!(%error, what, "history load failed");
        self.state.push_notice(format!("couldn't load {what}"));
        true
    }

    // -- timers ---------------------------------------------------------------

    fn next_annotation_deadline(&mut self) -> Option<Instant> {
        match (self.state.notes.next_deadline(), self.state.drawings.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    fn expire_annotations(&mut self) {
        let now = Instant::now();
        let notes = self.state.notes.expire_due(now);
        let drawings = self.state.drawings.expire_due(now);
        if !notes.is_empty() || !drawings.is_empty() {
            debug!(notes = notes.len(), drawings = drawings.len(), "annotations expired");
            self.bump_revision();
        }
    }

    // -- outbound -------------------------------------------------------------

    /// Page-scoped broadcast under the local identity. Presence and
    /// annotation events all go out this way; chat envelopes come
    /// pre-built from the pane and skip the page scope.
    async fn broadcast(&self, event: Event) {
        let envelope = Envelope {
            sender: Some(self.state.local.peer_ref()),
            page: Some(self.state.page.clone()),
            event,
        };
        self.publish_envelope(&envelope).await;
    }

    async fn publish_envelope(&self, envelope: &Envelope) {
        if self.state.link == LinkStatus::Dead {
            return;
        }
        let Some(transport) = &self.transport else { return };
        if let Err(error) = transport.publish(envelope).await {
            debug!(%error, "broadcast dropped");
        }
    }

    fn bump_revision(&mut self) {
        self.state.revision = self.state.revision.wrapping_add(1);
        let _ = self.revision_tx.send(self.state.revision);
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn next_link(link: &mut Option<mpsc::Receiver<LinkEvent>>) -> Option<LinkEvent> {
    match link {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

fn now_ms() -> i64 {
    let Ok(elapsed) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
