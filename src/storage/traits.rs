//! Collaborator interfaces consumed by the real-time core
//!
//! Durable storage and conversation membership live outside this crate.
//! The gateway only needs the narrow surface below; implementations may do
//! I/O, so they are async and are never called while a core lock is held.

use async_trait::async_trait;

use crate::core::message::{ChatMessage, ReadReceipt};
use crate::error::Result;

/// Message persistence, invoked after broadcast decisions
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist an accepted message
    async fn append_message(&self, message: &ChatMessage) -> Result<()>;

    /// Record that `user_id` read `message_id`; the receipt names the
    /// conversation the read should be announced in
    async fn mark_read(&self, message_id: &str, user_id: &str) -> Result<ReadReceipt>;
}

/// Conversation membership lookup
#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    /// Users sharing at least one conversation with `user_id`, excluding them
    async fn co_participants(&self, user_id: &str) -> Result<Vec<String>>;

    async fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool>;
}
