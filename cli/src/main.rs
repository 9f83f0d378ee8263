//! Headless widget session for poking at a copresence channel.
//!
//! Runs the engine without a host page: stdin lines become chat messages,
//! slash commands drive the drawer and annotations, and state transitions
//! print as they land. Point two terminals at the same channel to watch
//! presence and chat reconcile.

use std::path::{Path, PathBuf};

use clap::Parser;
use copresence::annotations::ClickTarget;
use copresence::chat::ChatTab;
use copresence::config::{StoreConfig, TransportConfig, WidgetConfig};
use copresence::engine::{Command, Engine, Widget};
use copresence::identity::{GuestIdentity, LocalUser};
use copresence::presence::AvatarDock;
use copresence::state::{LinkStatus, WidgetSnapshot};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("relay transport needs --relay-url, --relay-key, and --relay-channel together")]
    RelayConfigIncomplete,
    #[error("stdin read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "copresence-cli", about = "Headless copresence widget session")]
struct Cli {
    /// Page path this session browses, e.g. /blog.
    #[arg(long, env = "COPRESENCE_PAGE", default_value = "/")]
    page: String,

    /// Logged-in user id. Omit to run as a guest.
    #[arg(long, env = "COPRESENCE_USER_ID")]
    user_id: Option<String>,

    #[arg(long, env = "COPRESENCE_USER_NAME", default_value = "cli")]
    user_name: String,

    /// Admin sessions see the support ticket dashboard.
    #[arg(long, env = "COPRESENCE_ADMIN", default_value_t = false)]
    admin: bool,

    #[arg(long, env = "COPRESENCE_STORE_URL")]
    store_url: Option<String>,

    #[arg(long, env = "COPRESENCE_STORE_TOKEN")]
    store_token: Option<String>,

    /// Raw WebSocket endpoint, e.g. ws://127.0.0.1:9000.
    #[arg(
        long,
        env = "COPRESENCE_SOCKET_URL",
        conflicts_with_all = ["relay_url", "relay_key", "relay_channel"]
    )]
    socket_url: Option<String>,

    #[arg(long, env = "COPRESENCE_RELAY_URL")]
    relay_url: Option<String>,

    #[arg(long, env = "COPRESENCE_RELAY_KEY")]
    relay_key: Option<String>,

    #[arg(long, env = "COPRESENCE_RELAY_CHANNEL")]
    relay_channel: Option<String>,

    /// Where the guest identity cache lives.
    #[arg(long, env = "COPRESENCE_GUEST_CACHE")]
    guest_cache: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let transport = resolve_transport(&cli)?;

    let guest_cache = cli
        .guest_cache
        .clone()
        .unwrap_or_else(|| PathBuf::from(copresence::config::DEFAULT_GUEST_CACHE));
    let mut config = WidgetConfig::new(cli.page.clone(), resolve_identity(&cli, &guest_cache));
    config.guest_cache_path = guest_cache;
    config.transport = transport;
    config.store = cli.store_url.clone().map(|base_url| StoreConfig {
        base_url,
        token: cli.store_token.clone().unwrap_or_default(),
    });

    println!(
        "copresence-cli on {} as {} ({}); /help for commands",
        config.page, config.user.name, config.user.id
    );

    let widget = Engine::spawn(config);
    let mut revision = widget.revision();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut rendered = Rendered::new();

    // Catch anything that happened before the first revision tick, like the
    // no-transport startup notice.
    if let Some(view) = widget.snapshot().await {
        rendered.print_transitions(&view);
    }

    loop {
        tokio::select! {
            changed = revision.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(view) = widget.snapshot().await else { break };
                rendered.print_transitions(&view);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !dispatch_line(&widget, line.trim()).await {
                    break;
                }
            }
        }
    }

    widget.shutdown().await;
    Ok(())
}

fn resolve_identity(cli: &Cli, guest_cache: &Path) -> LocalUser {
    if let Some(id) = &cli.user_id {
        return LocalUser::new(id.clone(), cli.user_name.clone(), cli.admin);
    }
    if let Some(guest) = GuestIdentity::load(guest_cache) {
        return LocalUser::from_guest(&guest);
    }
    // Provisional guest; /register mints and caches a durable one.
    LocalUser::from_guest(&GuestIdentity::generate(cli.user_name.clone(), ""))
}

fn resolve_transport(cli: &Cli) -> Result<Option<TransportConfig>, CliError> {
    let any_relay = cli.relay_url.is_some() || cli.relay_key.is_some() || cli.relay_channel.is_some();
    if any_relay {
        let (Some(endpoint), Some(key), Some(channel)) =
            (cli.relay_url.clone(), cli.relay_key.clone(), cli.relay_channel.clone())
        else {
            return Err(CliError::RelayConfigIncomplete);
        };
        return Ok(Some(TransportConfig::Relay { endpoint, key, channel }));
    }
    Ok(cli.socket_url.clone().map(|url| TransportConfig::Socket { url }))
}

// =============================================================================
// INPUT
// =============================================================================

/// Returns `false` when the session should end.
async fn dispatch_line(widget: &Widget, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    let Some(rest) = line.strip_prefix('/') else {
        widget.command(Command::SendMessage(line.to_owned())).await;
        return true;
    };
    let (name, args) = match rest.split_once(' ') {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    match name {
        "open" => {
            widget.command(Command::OpenDrawer).await;
        }
        "close" => {
            widget.command(Command::CloseDrawer).await;
        }
        "tab" => match args {
            "web" => {
                widget.command(Command::SwitchTab(ChatTab::Web)).await;
            }
            "friend" => {
                widget.command(Command::SwitchTab(ChatTab::Friend)).await;
            }
            "support" => {
                widget.command(Command::SwitchTab(ChatTab::Support)).await;
            }
            _ => eprintln!("usage: /tab web|friend|support"),
        },
        "friend" => {
            if args.is_empty() {
                eprintln!("usage: /friend <user-id>");
            } else {
                widget.command(Command::SelectFriend(args.to_owned())).await;
            }
        }
        "ticket" => {
            if args.is_empty() {
                eprintln!("usage: /ticket <user-id>");
            } else {
                widget.command(Command::SelectTicket(args.to_owned())).await;
            }
        }
        "note" => place_note(widget, args).await,
        "delete" => {
            if args.is_empty() {
                eprintln!("usage: /delete <note-id>");
            } else {
                widget.command(Command::DeleteNote(args.to_owned())).await;
            }
        }
        "draw" => draw_stroke(widget, args).await,
        "cursor" => {
            let mut parts = args.split_whitespace();
            match (parse_f64(parts.next()), parse_f64(parts.next())) {
                (Some(x), Some(y)) => {
                    widget.command(Command::CursorMoved { x, y }).await;
                }
                _ => eprintln!("usage: /cursor <x> <y>"),
            }
        }
        "away" => {
            widget.command(Command::VisibilityChanged(false)).await;
        }
        "back" => {
            widget.command(Command::VisibilityChanged(true)).await;
        }
        "register" => match args.split_once(' ') {
            Some((reg_name, email)) => {
                widget
                    .command(Command::RegisterGuest {
                        name: reg_name.trim().to_owned(),
                        email: email.trim().to_owned(),
                    })
                    .await;
            }
            None => eprintln!("usage: /register <name> <email>"),
        },
        "help" => print_help(),
        "quit" | "exit" => return false,
        _ => eprintln!("unknown command; /help lists them"),
    }
    true
}

async fn place_note(widget: &Widget, args: &str) {
    let mut parts = args.splitn(3, ' ');
    let (x, y, body) = (parse_f64(parts.next()), parse_f64(parts.next()), parts.next());
    let (Some(x), Some(y), Some(body)) = (x, y, body) else {
        eprintln!("usage: /note <x> <y> <text>");
        return;
    };
    widget.command(Command::SetNotesMode(true)).await;
    widget
        .command(Command::PageClick {
            target: ClickTarget::Page { x, y },
            note_body: body.to_owned(),
        })
        .await;
}

async fn draw_stroke(widget: &Widget, args: &str) {
    let mut points = args.split_whitespace().filter_map(|pair| {
        let (x, y) = pair.split_once(',')?;
        Some((x.parse::<f64>().ok()?, y.parse::<f64>().ok()?))
    });
    let Some((x, y)) = points.next() else {
        eprintln!("usage: /draw <x,y> <x,y> ...");
        return;
    };
    widget.command(Command::SetDrawMode(true)).await;
    widget.command(Command::StrokeStart { x, y }).await;
    for (x, y) in points {
        widget.command(Command::StrokePoint { x, y }).await;
    }
    widget.command(Command::StrokeEnd).await;
}

fn parse_f64(token: Option<&str>) -> Option<f64> {
    token?.parse().ok()
}

fn print_help() {
    println!(
        "\
/open /close           drawer
/tab web|friend|support
/friend <user-id>      open a 1:1 conversation
/ticket <user-id>      open a support ticket (admin)
/note <x> <y> <text>   place a sticky note
/delete <note-id>      delete a note
/draw <x,y> <x,y>...   draw a stroke
/cursor <x> <y>        move the cursor
/away /back            page visibility
/register <name> <email>
/quit
anything else is sent as a chat message"
    );
}

// =============================================================================
// OUTPUT
// =============================================================================

/// Last printed view of each surface, so only transitions print.
struct Rendered {
    link: LinkStatus,
    dock: String,
    view_key: (ChatTab, Option<String>, Option<String>),
    message_count: usize,
    badge: u32,
    note_ids: Vec<String>,
    drawing_ids: Vec<String>,
    notice_count: usize,
    last_notice: Option<String>,
    friend_count: usize,
    ticket_count: usize,
}

impl Rendered {
    fn new() -> Self {
        Self {
            link: LinkStatus::Connecting,
            dock: String::new(),
            view_key: (ChatTab::Web, None, None),
            message_count: 0,
            badge: 0,
            note_ids: Vec::new(),
            drawing_ids: Vec::new(),
            notice_count: 0,
            last_notice: None,
            friend_count: 0,
            ticket_count: 0,
        }
    }

    fn print_transitions(&mut self, view: &WidgetSnapshot) {
        if view.link != self.link {
            println!("link: {}", link_label(view.link));
            self.link = view.link;
        }

        let dock = dock_line(&view.dock);
        if dock != self.dock {
            println!("present: {dock}");
            self.dock = dock;
        }

        let view_key =
            (view.active_tab, view.selected_friend.clone(), view.selected_ticket.clone());
        if view_key != self.view_key {
            self.view_key = view_key;
            self.message_count = 0;
            println!("-- {} --", view_label(view));
        }
        if view.messages.len() > self.message_count {
            for message in &view.messages[self.message_count..] {
                println!("{}: {}", message.author_name, message.body);
            }
        }
        self.message_count = view.messages.len();

        if view.badge != self.badge {
            if view.badge > 0 {
                println!("badge: {}", view.badge);
            }
            self.badge = view.badge;
        }

        for note in &view.notes {
            if !self.note_ids.contains(&note.id) {
                println!("note {} by {}: {}", note.id, note.author_name, note.body);
            }
        }
        if view.notes.len() < self.note_ids.len() {
            println!("notes: {}", view.notes.len());
        }
        self.note_ids = view.notes.iter().map(|note| note.id.clone()).collect();

        for drawing in &view.drawings {
            if !self.drawing_ids.contains(&drawing.id) {
                println!("drawing by {}", drawing.author_name);
            }
        }
        if view.drawings.len() < self.drawing_ids.len() {
            println!("drawings: {}", view.drawings.len());
        }
        self.drawing_ids = view.drawings.iter().map(|drawing| drawing.id.clone()).collect();

        if view.active_tab == ChatTab::Friend
            && view.selected_friend.is_none()
            && view.friends.len() != self.friend_count
        {
            for head in &view.friends {
                println!("  {} ({})", head.peer_name, head.peer_id);
            }
        }
        self.friend_count = view.friends.len();

        if view.active_tab == ChatTab::Support
            && view.selected_ticket.is_none()
            && view.tickets.len() != self.ticket_count
        {
            for ticket in &view.tickets {
                let marker = if ticket.unread { "*" } else { " " };
                println!("  {marker} {} ({}): {}", ticket.user_name, ticket.user_id, ticket.last_message);
            }
        }
        self.ticket_count = view.tickets.len();

        if view.notices.len() > self.notice_count {
            for notice in &view.notices[self.notice_count..] {
                println!("! {notice}");
            }
        } else if view.notices.last() != self.last_notice.as_ref() {
            if let Some(notice) = view.notices.last() {
                println!("! {notice}");
            }
        }
        self.notice_count = view.notices.len();
        self.last_notice = view.notices.last().cloned();
    }
}

fn link_label(status: LinkStatus) -> &'static str {
    match status {
        LinkStatus::Connecting => "connecting",
        LinkStatus::Up => "up",
        LinkStatus::Down => "down",
        LinkStatus::Dead => "dead",
    }
}

fn dock_line(dock: &AvatarDock) -> String {
    if dock.chips.is_empty() {
        return "(nobody)".to_owned();
    }
    let names: Vec<&str> = dock.chips.iter().map(|chip| chip.name.as_str()).collect();
    let line = names.join(", ");
    if dock.overflow > 0 {
        return format!("{line} +{}", dock.overflow);
    }
    line
}

fn view_label(view: &WidgetSnapshot) -> String {
    match view.active_tab {
        ChatTab::Web => "web chat".to_owned(),
        ChatTab::Friend => match &view.selected_friend {
            Some(id) => format!("conversation with {id}"),
            None => "conversations".to_owned(),
        },
        ChatTab::Support => match &view.selected_ticket {
            Some(id) => format!("ticket {id}"),
            None => "support".to_owned(),
        },
    }
}
