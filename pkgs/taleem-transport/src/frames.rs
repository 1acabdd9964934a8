//! Wire frames exchanged over the push channels
//!
//! Frames are JSON records discriminated by a `type` field. Anything the
//! discriminator does not match is dropped by the dispatcher with a warning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound frame from either push channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    ChatMessage(ChatMessageFrame),
    NotificationEvent(NotificationEventFrame),
}

/// A pushed chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageFrame {
    /// Durable message id, when the server includes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub message: String,
    pub sender_id: String,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A non-chat notification (activity hints, announcements)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEventFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

/// Outbound frame, pushed best-effort alongside the durable write
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    ChatMessage {
        message: String,
        sender_id: String,
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },
}
