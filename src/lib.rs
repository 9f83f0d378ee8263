//! Presence and chat widget engine for embedding in a host page.
//!
//! One running engine is one peer on a realtime channel: live cursors and
//! an avatar dock, a tabbed chat drawer with unread counters, and
//! short-lived page annotations, all reconciled from a broadcast event
//! stream that every peer receives. The crate owns the full session state;
//! hosts drive it with [`engine::Command`]s, watch the revision channel,
//! and render from [`state::WidgetSnapshot`]s. Nothing here touches a DOM:
//! the host shell decides what the widget looks like.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`engine`] | The session task, host handle, and command surface |
//! | [`state`] | [`state::WidgetState`] and the host-facing snapshot |
//! | [`router`] | Inbound gates: local echo, page scope, dedup, dispatch |
//! | [`transport`] | Relay and raw-socket backends with reconnect |
//! | [`chat`] | Tabbed drawer state machine and unread counters |
//! | [`presence`] | Cursor entities and the avatar dock |
//! | [`annotations`] | Ephemeral sticky notes and rasterized strokes |
//! | [`dedup`] | Bounded insertion-ordered dedup cache |
//! | [`store`] | Durable history and persistence client |
//! | [`identity`] | Local identity, guest cache, color palette |
//! | [`config`] | Widget, store, and transport selection |

pub mod annotations;
pub mod chat;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod identity;
pub mod presence;
pub mod router;
pub mod state;
pub mod store;
pub mod transport;
