//! Local and remote identity.
//!
//! DESIGN
//! ======
//! Identity is opaque to the core: the backing store issues numeric ids for
//! registered users and the widget mints `guest-<uuid>` ids for everyone
//! else. Both are carried as canonical strings (coerced at the wire
//! boundary, see the events crate). Color tags are derived deterministically
//! from the id so every peer renders the same user in the same color without
//! coordination.
//!
//! Guests cache their identity as a small JSON file so a page reload keeps
//! the same id, name, and email. A cache that fails to load is treated as
//! absent, never as an error.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use events::PeerRef;

pub const MAX_NAME_LEN: usize = 40;
pub const MAX_EMAIL_LEN: usize = 100;

const COLOR_TAGS: [&str; 10] = [
    "#d94b4b", "#e07a3f", "#d6a520", "#4f9d5d", "#2ea58c",
    "#2ec4b6", "#3f7fbf", "#5b5ea6", "#8e5ba6", "#bf3f7f",
];

const FALLBACK_COLOR: &str = "#d94b4b";

// =============================================================================
// ERROR TYPE
// =============================================================================

/// Malformed local input. Blocks the action locally; never reaches the
/// network.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("display name cannot be empty")]
    EmptyName,
    #[error("display name too long (max {MAX_NAME_LEN} characters)")]
    NameTooLong,
    #[error("email address is not valid")]
    InvalidEmail,
}

// =============================================================================
// LOCAL USER
// =============================================================================

/// The identity this widget session acts as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalUser {
    pub id: String,
    pub name: String,
    pub color: String,
    pub is_guest: bool,
    /// Admin-role sessions see the support ticket list instead of a single
    /// support conversation.
    pub is_admin: bool,
}

impl LocalUser {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, is_admin: bool) -> Self {
        let id = id.into();
        let color = color_for_id(&id).to_owned();
        Self { id, name: name.into(), color, is_guest: false, is_admin }
    }

    #[must_use]
    pub fn from_guest(guest: &GuestIdentity) -> Self {
        let color = color_for_id(&guest.id).to_owned();
        Self {
            id: guest.id.clone(),
            name: guest.name.clone(),
            color,
            is_guest: true,
            is_admin: false,
        }
    }

    /// Wire-form sender reference for outbound envelopes.
    #[must_use]
    pub fn peer_ref(&self) -> PeerRef {
        PeerRef { id: self.id.clone(), name: self.name.clone(), color: self.color.clone() }
    }
}

// =============================================================================
// GUEST IDENTITY CACHE
// =============================================================================

/// Guest identity persisted client-side across reloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestIdentity {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl GuestIdentity {
    /// Mint a fresh guest identity. Inputs must already be validated.
    #[must_use]
    pub fn generate(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self { id: format!("guest-{}", Uuid::new_v4()), name: name.into(), email: email.into() }
    }

    /// Load a cached identity. Any failure (missing file, bad JSON) reads as
    /// "no cached identity".
    #[must_use]
    pub fn load(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Persist this identity for the next session.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; callers log and continue, a guest
    /// that cannot be cached still works for the current session.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Validate guest registration input before anything touches the network.
///
/// # Errors
///
/// Returns [`ValidationError`] describing the first rejected field.
pub fn validate_guest(name: &str, email: &str) -> Result<(), ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong);
    }
    let email = email.trim();
    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return Err(ValidationError::InvalidEmail);
    }
    // Local part and domain with a dot, nothing stricter.
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ValidationError::InvalidEmail);
    };
    if local.is_empty() || domain.len() < 3 || !domain.contains('.') || domain.contains('@') {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(())
}

// =============================================================================
// COLOR TAGS
// =============================================================================

/// Deterministic color tag for a user id. Same id, same color, on every peer.
#[must_use]
pub fn color_for_id(id: &str) -> &'static str {
    let mut hash: u32 = 0;
    for byte in id.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(u32::from(byte));
    }
    COLOR_TAGS[(hash as usize) % COLOR_TAGS.len()]
}

/// Parse `#RGB` or `#RRGGBB` values into RGB channels.
#[must_use]
pub fn parse_hex_rgb(raw: &str) -> Option<(u8, u8, u8)> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('#') {
        return None;
    }
    let hex = &trimmed[1..];
    if !hex.is_ascii() {
        return None;
    }
    match hex.len() {
        3 => {
            let r = u8::from_str_radix(&hex[0..1].repeat(2), 16).ok()?;
            let g = u8::from_str_radix(&hex[1..2].repeat(2), 16).ok()?;
            let b = u8::from_str_radix(&hex[2..3].repeat(2), 16).ok()?;
            Some((r, g, b))
        }
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            Some((r, g, b))
        }
        _ => None,
    }
}

/// Normalize a peer-supplied color to canonical lowercase `#rrggbb`, falling
/// back to the deterministic tag for unparseable values.
#[must_use]
pub fn normalize_peer_color(value: &str, peer_id: &str) -> String {
    let fallback = parse_hex_rgb(color_for_id(peer_id))
        .or_else(|| parse_hex_rgb(FALLBACK_COLOR))
        .unwrap_or((217, 75, 75));
    let (r, g, b) = parse_hex_rgb(value).unwrap_or(fallback);
    format!("#{r:02x}{g:02x}{b:02x}")
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
