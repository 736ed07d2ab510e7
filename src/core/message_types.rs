//! Wire event types exchanged over the socket
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::message::{Attachment, ChatMessage, ReadReceipt};
use crate::error::{RelayError, Result};

/// Client-to-server events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// First frame when no token was offered during the upgrade
    Authenticate { token: String },

    JoinConversation { conversation_id: String },

    LeaveConversation { conversation_id: String },

    SendMessage {
        conversation_id: String,
        content: String,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },

    TypingStart { conversation_id: String },

    TypingStop { conversation_id: String },

    MarkMessageRead { message_id: String },

    /// Appear online/offline while staying connected
    SetPresence { online: bool },
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| RelayError::MessageParseError(format!("Invalid event: {}", e)))
    }
}

/// Server-to-client events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Sent once the connection has been admitted
    Connected {
        user_id: String,
        connection_id: String,
    },

    UserOnline {
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    UserOffline {
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    UserJoinedConversation {
        conversation_id: String,
        user_id: String,
    },

    UserLeftConversation {
        conversation_id: String,
        user_id: String,
    },

    NewMessage(ChatMessage),

    /// Acknowledgement to the sender only
    MessageSent {
        message_id: String,
        conversation_id: String,
        created_at: DateTime<Utc>,
    },

    MessageError {
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        code: String,
        reason: String,
    },

    MessageRead(ReadReceipt),

    UserTyping {
        conversation_id: String,
        user_id: String,
        is_typing: bool,
    },

    ConversationCreated {
        conversation_id: String,
        participants: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        created_by: Option<String>,
    },

    ConnectionError { code: String, message: String },
}

impl ServerEvent {
    pub fn message_error(conversation_id: Option<String>, err: &RelayError) -> Self {
        Self::MessageError {
            conversation_id,
            code: err.code().to_string(),
            reason: err.to_string(),
        }
    }

    pub fn connection_error(err: &RelayError) -> Self {
        Self::ConnectionError {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::UserOnline { .. } => "user_online",
            Self::UserOffline { .. } => "user_offline",
            Self::UserJoinedConversation { .. } => "user_joined_conversation",
            Self::UserLeftConversation { .. } => "user_left_conversation",
            Self::NewMessage(_) => "new_message",
            Self::MessageSent { .. } => "message_sent",
            Self::MessageError { .. } => "message_error",
            Self::MessageRead(_) => "message_read",
            Self::UserTyping { .. } => "user_typing",
            Self::ConversationCreated { .. } => "conversation_created",
            Self::ConnectionError { .. } => "connection_error",
        }
    }

    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| RelayError::MessageParseError(format!("Failed to encode event: {}", e)))
    }
}
