use log::{debug, trace};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use warp::ws::Message;

use crate::core::connection::ConnectionId;
use crate::core::message_types::ServerEvent;
use crate::core::registry::ConnectionRegistry;
use crate::error::Result;

/// Broadcast group identifier
///
/// The two families render with distinct prefixes so a user ID and a
/// conversation ID can never name the same room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// Personal room holding every connection of one user
    User(String),
    Conversation(String),
}

impl RoomId {
    pub fn user(user_id: &str) -> Self {
        Self::User(user_id.to_string())
    }

    pub fn conversation(conversation_id: &str) -> Self {
        Self::Conversation(conversation_id.to_string())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::Conversation(id) => write!(f, "conversation:{}", id),
        }
    }
}

#[derive(Default)]
struct RoomState {
    /// Room -> member connections
    members: HashMap<RoomId, HashSet<ConnectionId>>,
    /// Connection -> rooms it belongs to
    memberships: HashMap<ConnectionId, HashSet<RoomId>>,
}

impl RoomState {
    fn join(&mut self, connection_id: &str, room: RoomId) -> bool {
        let added = self
            .members
            .entry(room.clone())
            .or_default()
            .insert(connection_id.to_string());
        self.memberships
            .entry(connection_id.to_string())
            .or_default()
            .insert(room);
        added
    }

    fn leave(&mut self, connection_id: &str, room: &RoomId) -> bool {
        let removed = match self.members.get_mut(room) {
            Some(set) => {
                let removed = set.remove(connection_id);
                if set.is_empty() {
                    self.members.remove(room);
                }
                removed
            }
            None => false,
        };
        if let Some(rooms) = self.memberships.get_mut(connection_id) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.memberships.remove(connection_id);
            }
        }
        removed
    }
}

/// Manages room membership and delivers events to member connections
pub struct RoomRouter {
    state: RwLock<RoomState>,
    registry: Arc<ConnectionRegistry>,
}

impl RoomRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            state: RwLock::new(RoomState::default()),
            registry,
        }
    }

    /// Place a freshly admitted connection in its owner's personal room
    pub fn join_user_room(&self, connection_id: &str, user_id: &str) -> Result<()> {
        let mut state = self.state.write()?;
        state.join(connection_id, RoomId::user(user_id));
        Ok(())
    }

    /// Returns true when the connection was not already a member
    pub fn join_conversation(&self, connection_id: &str, conversation_id: &str) -> Result<bool> {
        let mut state = self.state.write()?;
        Ok(state.join(connection_id, RoomId::conversation(conversation_id)))
    }

    /// Returns true when the connection was a member
    pub fn leave_conversation(&self, connection_id: &str, conversation_id: &str) -> Result<bool> {
        let mut state = self.state.write()?;
        Ok(state.leave(connection_id, &RoomId::conversation(conversation_id)))
    }

    /// Remove a connection from every room it joined, via the reverse index
    pub fn drop_connection(&self, connection_id: &str) -> Result<Vec<RoomId>> {
        let mut state = self.state.write()?;
        let rooms: Vec<RoomId> = state
            .memberships
            .remove(connection_id)
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();

        for room in &rooms {
            if let Some(set) = state.members.get_mut(room) {
                set.remove(connection_id);
                if set.is_empty() {
                    state.members.remove(room);
                }
            }
        }

        debug!(
            "Dropped connection {} from {} rooms",
            connection_id,
            rooms.len()
        );
        Ok(rooms)
    }

    /// Deliver an event to every live member, optionally skipping one connection.
    /// Returns how many members the event was queued for.
    pub fn broadcast(
        &self,
        room: &RoomId,
        event: &ServerEvent,
        exclude: Option<&str>,
    ) -> Result<usize> {
        let members: Vec<ConnectionId> = {
            let state = self.state.read()?;
            match state.members.get(room) {
                Some(set) => set
                    .iter()
                    .filter(|id| exclude.map_or(true, |ex| ex != id.as_str()))
                    .cloned()
                    .collect(),
                None => return Ok(0),
            }
        };

        let text = event.to_text()?;
        let mut delivered = 0;
        for member in members {
            // Unknown or closed senders are dropped; cleanup reconciles them
            if let Some(sender) = self.registry.sender(&member)? {
                if sender.send(Message::text(text.clone())).is_ok() {
                    delivered += 1;
                }
            }
        }

        trace!("Broadcast {} to {} members of {}", event.name(), delivered, room);
        Ok(delivered)
    }

    pub fn members(&self, room: &RoomId) -> Result<Vec<ConnectionId>> {
        let state = self.state.read()?;
        Ok(state
            .members
            .get(room)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn rooms_of(&self, connection_id: &str) -> Result<Vec<RoomId>> {
        let state = self.state.read()?;
        Ok(state
            .memberships
            .get(connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn is_member(&self, connection_id: &str, room: &RoomId) -> Result<bool> {
        let state = self.state.read()?;
        Ok(state
            .members
            .get(room)
            .map_or(false, |set| set.contains(connection_id)))
    }

    pub fn room_count(&self) -> Result<usize> {
        Ok(self.state.read()?.members.len())
    }
}
