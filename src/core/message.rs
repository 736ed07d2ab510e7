use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque attachment descriptor supplied by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(
        conversation_id: String,
        sender_id: String,
        content: String,
        attachments: Vec<Attachment>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content,
            attachments,
            created_at: Utc::now(),
        }
    }
}

/// Result of marking a message as read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = ChatMessage::new("c1".to_string(), "alice".to_string(), "Hello".to_string(), vec![]);
        assert_eq!(msg.sender_id, "alice");
        assert_eq!(msg.content, "Hello");
        assert_eq!(msg.conversation_id, "c1");
    }

    #[test]
    fn test_message_serializes_camel_case() {
        let msg = ChatMessage::new("c1".to_string(), "alice".to_string(), "Hi".to_string(), vec![]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["conversationId"], "c1");
        assert_eq!(value["senderId"], "alice");
        assert!(value["createdAt"].is_string());
    }
}
