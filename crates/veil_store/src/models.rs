//! Database row models — these map to/from SQL rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContactRow {
    pub peer_id: String,
    /// Base64 SPKI DER RSA public key. Empty string = key still pending;
    /// outbound sends to this contact are blocked until it arrives.
    pub public_key: String,
    pub nickname: String,
    pub added_at: DateTime<Utc>,
}

impl ContactRow {
    pub fn key_pending(&self) -> bool {
        self.public_key.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: String,
    pub sender: String,
    pub content: String,
    pub kind: String,
    pub file_path: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub sent_by_me: bool,
    pub is_delivered: bool,
    pub is_read: bool,
}

/// Insert form for a message; `id` and `timestamp` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender: String,
    pub content: String,
    pub kind: MessageKind,
    pub file_path: Option<String>,
    pub sent_by_me: bool,
    pub is_delivered: bool,
    pub is_read: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StatusRow {
    pub id: i64,
    pub peer_id: String,
    pub content: String,
    pub posted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
