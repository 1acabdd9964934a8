use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dashboard role of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    AEO,
    FDE,
    Principal,
    Admin,
}

/// Reference to a user as embedded in conversations and messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub username: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_name: Option<String>,
}

/// Denormalized projection of the newest message, embedded in a conversation
/// so the list renders without fetching full history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub sender_id: String,
    pub is_own: bool,
}

/// One conversation summary as returned by list-conversations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participants: [UserRef; 2],
    /// Subject context of the thread, e.g. the school name
    pub subject_label: String,
    pub latest_message: Option<MessagePreview>,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    /// Timestamp used for ordering: last activity, falling back to creation
    pub fn activity_or_created(&self) -> DateTime<Utc> {
        if self.last_activity_at >= self.created_at {
            self.last_activity_at
        } else {
            self.created_at
        }
    }

    /// The other participant of the thread
    pub fn counterpart(&self, own_id: &str) -> Option<&UserRef> {
        self.participants.iter().find(|p| p.id != own_id)
    }
}

/// A persisted message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: UserRef,
    pub message_text: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

impl Message {
    /// Whether the message was sent by the given user. Always derived from
    /// the sender, never stored alongside it.
    pub fn is_own(&self, current_user_id: &str) -> bool {
        self.sender.id == current_user_id
    }

    /// Project this message into a conversation-list preview
    pub fn preview(&self, current_user_id: &str) -> MessagePreview {
        MessagePreview {
            text: self.message_text.clone(),
            timestamp: self.timestamp,
            sender_id: self.sender.id.clone(),
            is_own: self.is_own(current_user_id),
        }
    }
}

/// Body of the create-message call
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub school_name: String,
    pub message_text: String,
    pub receiver_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Response of the get-unread-count call
#[derive(Debug, Clone, Deserialize)]
pub struct UnreadCountResponse {
    pub unread_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, role: Role) -> UserRef {
        UserRef {
            id: id.to_string(),
            username: format!("user-{}", id),
            role,
            school_name: None,
        }
    }

    #[test]
    fn test_is_own_derived_from_sender() {
        let msg = Message {
            id: "m1".to_string(),
            conversation_id: "c1".to_string(),
            sender: user("u7", Role::Principal),
            message_text: "attendance report is ready".to_string(),
            timestamp: Utc::now(),
            is_read: false,
        };

        assert!(msg.is_own("u7"));
        assert!(!msg.is_own("u9"));
        assert!(msg.preview("u7").is_own);
        assert!(!msg.preview("u9").is_own);
    }

    #[test]
    fn test_counterpart() {
        let conv = Conversation {
            id: "c1".to_string(),
            participants: [user("aeo-1", Role::AEO), user("pr-2", Role::Principal)],
            subject_label: "IMCB G-10/4".to_string(),
            latest_message: None,
            unread_count: 0,
            created_at: Utc::now(),
            last_activity_at: Utc::now(),
        };

        assert_eq!(conv.counterpart("aeo-1").unwrap().id, "pr-2");
        assert_eq!(conv.counterpart("pr-2").unwrap().id, "aeo-1");
    }
}
