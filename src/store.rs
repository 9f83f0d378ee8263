//! Durable store client.
//!
//! DESIGN
//! ======
//! The CRUD side of the system (history, tickets, guest registry, annotation
//! persistence) lives behind an external HTTP collaborator. This client is a
//! thin JSON wrapper over its endpoints; it holds no state beyond the base
//! URL and the opaque per-request token.
//!
//! Store failures never enter the live broadcast path: the engine treats
//! saves as fire-and-forget (log and keep the optimistic render) and load
//! failures as empty views with a notice.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const TOKEN_HEADER: &str = "x-copresence-token";

const REQUEST_TIMEOUT_SECS: u64 = 15;
const CONNECT_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// ERROR TYPE
// =============================================================================

/// Durable save/load failure. Surfaced as a one-line notice; optimistic
/// state is never rolled back.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store returned {status} for {endpoint}")]
    Status { status: u16, endpoint: &'static str },
}

// =============================================================================
// ROW TYPES
// =============================================================================

/// A persisted chat message as the store returns it.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(deserialize_with = "de_id")]
    pub author_id: String,
    pub author_name: String,
    #[serde(default)]
    pub author_color: String,
    pub body: String,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub created_at: i64,
}

/// One page of channel history.
#[derive(Clone, Debug, Deserialize)]
pub struct HistoryPage {
    pub messages: Vec<StoredMessage>,
    #[serde(default)]
    pub has_more: bool,
}

/// One row of the friend-conversations list.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConversationHead {
    #[serde(rename = "otherUserId", deserialize_with = "de_id")]
    pub peer_id: String,
    #[serde(rename = "otherUserName")]
    pub peer_name: String,
    #[serde(rename = "lastMessageTime", default)]
    pub last_activity: i64,
}

/// One row of the admin ticket list.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketSummary {
    #[serde(deserialize_with = "de_id")]
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub last_message: String,
    #[serde(rename = "lastMessageTime", default)]
    pub last_activity: i64,
    #[serde(rename = "unreadByAdmin", default)]
    pub unread: bool,
    #[serde(default)]
    pub message_count: u64,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    messages: Vec<StoredMessage>,
}

#[derive(Debug, Deserialize)]
struct ConversationList {
    conversations: Vec<ConversationHead>,
}

#[derive(Debug, Deserialize)]
struct TicketList {
    tickets: Vec<TicketSummary>,
}

#[derive(Debug, Deserialize)]
struct Created {
    #[serde(deserialize_with = "de_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct AuthSignature {
    auth: String,
}

/// Coerce ids the store may return as either JSON strings or numbers.
fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    events::canonical_id(&value)
        .ok_or_else(|| serde::de::Error::custom("id must be a string or number"))
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Clone)]
pub struct StoreClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl StoreClient {
    /// # Errors
    ///
    /// Returns [`StoreError::Http`] if the underlying HTTP client cannot be
    /// built.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { http, base_url, token: token.into() })
    }

    // -- chat history -------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`StoreError`] on HTTP failure or a non-2xx response. Same for
    /// every other endpoint method.
    pub async fn history(
        &self,
        channel: &str,
        page: &str,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, StoreError> {
        let mut query = vec![("channel", channel.to_owned()), ("page", page.to_owned())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_owned()));
        }
        self.get_json("history", "/history", &query).await
    }

    pub async fn post_message(
        &self,
        channel: &str,
        body: &str,
        author_id: &str,
        author_name: &str,
    ) -> Result<String, StoreError> {
        let payload = serde_json::json!({
            "channel": channel,
            "body": body,
            "authorId": author_id,
            "authorName": author_name,
        });
        let created: Created = self.post_json("message", "/messages", &payload).await?;
        Ok(created.id)
    }

    // -- friend chat --------------------------------------------------------

    pub async fn individual_history(
        &self,
        user_id: &str,
        target_user_id: &str,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let query = [
            ("userId", user_id.to_owned()),
            ("targetUserId", target_user_id.to_owned()),
        ];
        let list: MessageList = self
            .get_json("individualHistory", "/messages/individual", &query)
            .await?;
        Ok(list.messages)
    }

    pub async fn post_individual_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        body: &str,
    ) -> Result<String, StoreError> {
        let payload = serde_json::json!({
            "senderId": sender_id,
            "recipientId": recipient_id,
            "body": body,
        });
        let created: Created = self
            .post_json("individualMessage", "/messages/individual", &payload)
            .await?;
        Ok(created.id)
    }

    pub async fn conversations(&self, user_id: &str) -> Result<Vec<ConversationHead>, StoreError> {
        let query = [("userId", user_id.to_owned())];
        let list: ConversationList = self
            .get_json("conversationsList", "/conversations", &query)
            .await?;
        Ok(list.conversations)
    }

    // -- support ------------------------------------------------------------

    pub async fn support_history(&self, user_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let query = [("userId", user_id.to_owned())];
        let list: MessageList = self
            .get_json("supportHistory", "/support/history", &query)
            .await?;
        Ok(list.messages)
    }

    pub async fn post_support_message(
        &self,
        user_id: &str,
        body: &str,
        role: &str,
    ) -> Result<String, StoreError> {
        let payload = serde_json::json!({ "userId": user_id, "body": body, "role": role });
        let created: Created = self
            .post_json("supportMessage", "/support/messages", &payload)
            .await?;
        Ok(created.id)
    }

    pub async fn admin_tickets(&self) -> Result<Vec<TicketSummary>, StoreError> {
        let list: TicketList = self
            .get_json("adminTickets", "/support/tickets", &[])
            .await?;
        Ok(list.tickets)
    }

    pub async fn post_admin_reply(
        &self,
        target_user_id: &str,
        body: &str,
        admin_id: &str,
        admin_name: &str,
    ) -> Result<String, StoreError> {
        let payload = serde_json::json!({
            "targetUserId": target_user_id,
            "body": body,
            "adminId": admin_id,
            "adminName": admin_name,
        });
        let created: Created = self
            .post_json("adminReply", "/support/replies", &payload)
            .await?;
        Ok(created.id)
    }

    pub async fn mark_ticket_read(&self, user_id: &str) -> Result<(), StoreError> {
        let payload = serde_json::json!({ "userId": user_id });
        self.post_unit("markTicketRead", "/support/tickets/read", &payload)
            .await
    }

    // -- annotations (fire-and-forget from the engine) ----------------------

    pub async fn create_note(
        &self,
        id: &str,
        x: f64,
        y: f64,
        body: &str,
        author_name: &str,
        color: &str,
        page: &str,
    ) -> Result<(), StoreError> {
        let payload = serde_json::json!({
            "id": id,
            "x": x,
            "y": y,
            "body": body,
            "authorName": author_name,
            "color": color,
            "page": page,
        });
        self.post_unit("createNote", "/notes", &payload).await
    }

    pub async fn delete_note(&self, id: &str) -> Result<(), StoreError> {
        let url = format!("{}/notes/{id}", self.base_url);
        let response = self
            .http
            .delete(url)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;
        check_status("deleteNote", &response)?;
        Ok(())
    }

    pub async fn create_drawing(
        &self,
        id: &str,
        image: &str,
        width: f64,
        height: f64,
        page: &str,
    ) -> Result<(), StoreError> {
        let payload = serde_json::json!({
            "id": id,
            "image": image,
            "width": width,
            "height": height,
            "page": page,
        });
        self.post_unit("createDrawing", "/drawings", &payload).await
    }

    // -- identity & transport auth ------------------------------------------

    pub async fn register_guest(
        &self,
        user_id: &str,
        name: &str,
        email: &str,
    ) -> Result<(), StoreError> {
        let payload = serde_json::json!({ "userId": user_id, "name": name, "email": email });
        self.post_unit("guestRegister", "/guests", &payload).await
    }

    /// Relay private-channel auth handshake. The signature is opaque here.
    pub async fn socket_auth(
        &self,
        socket_id: &str,
        channel_name: &str,
    ) -> Result<String, StoreError> {
        let payload = serde_json::json!({ "socketId": socket_id, "channelName": channel_name });
        let signed: AuthSignature = self.post_json("socketAuth", "/socket/auth", &payload).await?;
        Ok(signed.auth)
    }

    // -- plumbing -----------------------------------------------------------

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, StoreError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(url)
            .query(query)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;
        check_status(endpoint, &response)?;
        Ok(response.json().await?)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path: &str,
        payload: &Value,
    ) -> Result<T, StoreError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(url)
            .header(TOKEN_HEADER, &self.token)
            .json(payload)
            .send()
            .await?;
        check_status(endpoint, &response)?;
        Ok(response.json().await?)
    }

    async fn post_unit(
        &self,
        endpoint: &'static str,
        path: &str,
        payload: &Value,
    ) -> Result<(), StoreError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(url)
            .header(TOKEN_HEADER, &self.token)
            .json(payload)
            .send()
            .await?;
        check_status(endpoint, &response)?;
        Ok(())
    }
}

fn check_status(endpoint: &'static str, response: &reqwest::Response) -> Result<(), StoreError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(StoreError::Status { status: status.as_u16(), endpoint })
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
