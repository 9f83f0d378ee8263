//! Widget configuration.
//!
//! DESIGN
//! ======
//! Hosts embed the widget with an explicit [`WidgetConfig`]; the CLI builds
//! one from environment variables. Exactly one transport backend is selected
//! at startup. The hosted relay is the primary backend and the raw socket is
//! the fallback, so when both are configured the relay wins. No transport at
//! all is legal: the widget starts degraded (chat disabled) instead of
//! refusing to start.

use std::path::PathBuf;

use crate::identity::LocalUser;

const DEFAULT_PAGE: &str = "/";

/// Default guest identity cache location, relative to the working directory.
pub const DEFAULT_GUEST_CACHE: &str = ".copresence/guest.json";

// =============================================================================
// TRANSPORT SELECTION
// =============================================================================

/// Which realtime backend carries broadcasts for this session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportConfig {
    /// Hosted pub/sub relay channel.
    Relay { endpoint: String, key: String, channel: String },
    /// Raw duplex WebSocket.
    Socket { url: String },
}

impl TransportConfig {
    /// Read the backend selection from the environment.
    ///
    /// The relay requires all of `COPRESENCE_RELAY_URL`,
    /// `COPRESENCE_RELAY_KEY`, and `COPRESENCE_RELAY_CHANNEL`; the socket
    /// requires `COPRESENCE_SOCKET_URL`. Neither configured means `None`.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let relay = env_string("COPRESENCE_RELAY_URL").and_then(|endpoint| {
            let key = env_string("COPRESENCE_RELAY_KEY")?;
            let channel = env_string("COPRESENCE_RELAY_CHANNEL")?;
            Some(Self::Relay { endpoint, key, channel })
        });
        if relay.is_some() {
            return relay;
        }
        env_string("COPRESENCE_SOCKET_URL").map(|url| Self::Socket { url })
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Where durable history and annotation persistence live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    pub base_url: String,
    /// Opaque per-request token, sent as `x-copresence-token`.
    pub token: String,
}

impl StoreConfig {
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env_string("COPRESENCE_STORE_URL")?;
        let token = env_string("COPRESENCE_STORE_TOKEN").unwrap_or_default();
        Some(Self { base_url, token })
    }
}

// =============================================================================
// WIDGET CONFIG
// =============================================================================

/// Everything the engine needs to run one widget session.
#[derive(Clone, Debug)]
pub struct WidgetConfig {
    /// Page path this session is scoped to, e.g. `/blog`.
    pub page: String,
    pub user: LocalUser,
    pub store: Option<StoreConfig>,
    pub transport: Option<TransportConfig>,
    /// Where guest identities are cached between sessions.
    pub guest_cache_path: PathBuf,
}

impl WidgetConfig {
    #[must_use]
    pub fn new(page: impl Into<String>, user: LocalUser) -> Self {
        Self {
            page: page.into(),
            user,
            store: None,
            transport: None,
            guest_cache_path: PathBuf::from(DEFAULT_GUEST_CACHE),
        }
    }

    /// Build a config from the environment for the given identity.
    #[must_use]
    pub fn from_env(user: LocalUser) -> Self {
        let page = env_string("COPRESENCE_PAGE").unwrap_or_else(|| DEFAULT_PAGE.to_owned());
        let guest_cache_path = env_string("COPRESENCE_GUEST_CACHE")
            .map_or_else(|| PathBuf::from(DEFAULT_GUEST_CACHE), PathBuf::from);
        Self {
            page,
            user,
            store: StoreConfig::from_env(),
            transport: TransportConfig::from_env(),
            guest_cache_path,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
