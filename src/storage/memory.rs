//! In-memory collaborators for development and testing
//!
//! Keeps conversations and a bounded window of recent messages in memory.
//! Nothing survives a restart.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;

use super::traits::{ConversationDirectory, MessageStore};
use crate::core::message::{ChatMessage, ReadReceipt};
use crate::error::{RelayError, Result};

/// Maximum number of messages to keep
const DEFAULT_MAX_MESSAGES: usize = 10_000;

#[derive(Default)]
struct MessageLog {
    by_id: HashMap<String, ChatMessage>,
    order: VecDeque<String>,
    /// (message_id, user_id) -> receipt
    reads: HashMap<(String, String), ReadReceipt>,
}

pub struct InMemoryStore {
    conversations: RwLock<HashMap<String, HashSet<String>>>,
    messages: RwLock<MessageLog>,
    max_messages: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_MESSAGES)
    }

    pub fn with_capacity(max_messages: usize) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            messages: RwLock::new(MessageLog::default()),
            max_messages: max_messages.max(1),
        }
    }

    /// Create or replace a conversation with the given participants
    pub async fn create_conversation(&self, conversation_id: &str, participants: &[String]) {
        self.conversations.write().await.insert(
            conversation_id.to_string(),
            participants.iter().cloned().collect(),
        );
    }

    pub async fn add_participant(&self, conversation_id: &str, user_id: &str) {
        self.conversations
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    pub async fn message(&self, message_id: &str) -> Option<ChatMessage> {
        self.messages.read().await.by_id.get(message_id).cloned()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.by_id.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn append_message(&self, message: &ChatMessage) -> Result<()> {
        let mut log = self.messages.write().await;
        let id = message.id.to_string();

        // If at capacity, drop the oldest message and its receipts
        if log.order.len() >= self.max_messages {
            if let Some(oldest) = log.order.pop_front() {
                log.by_id.remove(&oldest);
                log.reads.retain(|(message_id, _), _| message_id != &oldest);
            }
        }

        log.order.push_back(id.clone());
        log.by_id.insert(id, message.clone());
        Ok(())
    }

    async fn mark_read(&self, message_id: &str, user_id: &str) -> Result<ReadReceipt> {
        let mut log = self.messages.write().await;
        let conversation_id = log
            .by_id
            .get(message_id)
            .map(|m| m.conversation_id.clone())
            .ok_or_else(|| {
                RelayError::StorageError(format!("Message {} not found", message_id))
            })?;

        let receipt = log
            .reads
            .entry((message_id.to_string(), user_id.to_string()))
            .or_insert_with(|| ReadReceipt {
                message_id: message_id.to_string(),
                conversation_id,
                user_id: user_id.to_string(),
                read_at: Utc::now(),
            })
            .clone();
        Ok(receipt)
    }
}

#[async_trait]
impl ConversationDirectory for InMemoryStore {
    async fn co_participants(&self, user_id: &str) -> Result<Vec<String>> {
        let conversations = self.conversations.read().await;
        let peers: HashSet<&String> = conversations
            .values()
            .filter(|members| members.contains(user_id))
            .flatten()
            .filter(|member| member.as_str() != user_id)
            .collect();
        Ok(peers.into_iter().cloned().collect())
    }

    async fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(conversation_id)
            .map_or(false, |members| members.contains(user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_co_participants_spans_conversations() {
        let store = InMemoryStore::new();
        store.create_conversation("c1", &users(&["alice", "bob"])).await;
        store.create_conversation("c2", &users(&["alice", "carol", "bob"])).await;
        store.create_conversation("c3", &users(&["dave", "erin"])).await;

        let mut peers = store.co_participants("alice").await.unwrap();
        peers.sort();
        assert_eq!(peers, vec!["bob", "carol"]);
        assert!(store.co_participants("zoe").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_is_participant() {
        let store = InMemoryStore::new();
        store.create_conversation("c1", &users(&["alice"])).await;
        store.add_participant("c1", "bob").await;

        assert!(store.is_participant("c1", "bob").await.unwrap());
        assert!(!store.is_participant("c1", "carol").await.unwrap());
        assert!(!store.is_participant("missing", "alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_read_resolves_conversation() {
        let store = InMemoryStore::new();
        let msg = ChatMessage::new("c1".to_string(), "alice".to_string(), "hi".to_string(), vec![]);
        store.append_message(&msg).await.unwrap();

        let receipt = store.mark_read(&msg.id.to_string(), "bob").await.unwrap();
        assert_eq!(receipt.conversation_id, "c1");
        assert_eq!(receipt.user_id, "bob");

        // Marking twice keeps the first receipt
        let again = store.mark_read(&msg.id.to_string(), "bob").await.unwrap();
        assert_eq!(again.read_at, receipt.read_at);
    }

    #[tokio::test]
    async fn test_mark_read_unknown_message_fails() {
        let store = InMemoryStore::new();
        let err = store.mark_read("nope", "bob").await.unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let store = InMemoryStore::with_capacity(2);
        let first = ChatMessage::new("c1".to_string(), "a".to_string(), "1".to_string(), vec![]);
        store.append_message(&first).await.unwrap();
        for n in 2..=3 {
            let msg = ChatMessage::new("c1".to_string(), "a".to_string(), n.to_string(), vec![]);
            store.append_message(&msg).await.unwrap();
        }
        assert_eq!(store.message_count().await, 2);
        assert!(store.message(&first.id.to_string()).await.is_none());
    }
}
