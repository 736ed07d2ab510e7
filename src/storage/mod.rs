//! Collaborator interfaces and the in-memory backend

pub mod memory;
pub mod traits;

pub use memory::InMemoryStore;
pub use traits::{ConversationDirectory, MessageStore};
