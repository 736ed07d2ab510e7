//! Connection registry
//!
//! Tracks the live sessions of every authenticated user and enforces the
//! per-user connection cap. When a user opens one connection too many, the
//! oldest session is told it was replaced and closed before the newcomer is
//! stored, so the cap holds at every instant.

use log::{debug, info};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use crate::constants::REPLACED_REASON;
use crate::core::connection::{Connection, ConnectionId, OutboundSender, CLOSE_REPLACED};
use crate::core::message_types::ServerEvent;
use crate::error::{RelayError, Result};

/// Outcome of admitting a connection
#[derive(Debug)]
pub struct Admission {
    /// Session that was pushed out to make room
    pub evicted: Option<Connection>,
    /// The user held no sessions before this one
    pub first_for_user: bool,
}

/// Outcome of removing a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    pub removed: bool,
    /// The removal emptied the user's connection set
    pub user_now_offline: bool,
}

#[derive(Default)]
struct RegistryState {
    /// Sessions per user, oldest first
    users: HashMap<String, VecDeque<Connection>>,
    /// Connection ID -> owning user
    owners: HashMap<ConnectionId, String>,
}

pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    max_per_user: usize,
}

impl ConnectionRegistry {
    pub fn new(max_per_user: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            max_per_user: max_per_user.max(1),
        }
    }

    /// Register a session, evicting the user's oldest one if the cap is reached
    pub fn admit(&self, connection: Connection) -> Result<Admission> {
        let user_id = connection.user_id.clone();
        let connection_id = connection.id.clone();

        let (evicted, first_for_user) = {
            let mut state = self.state.write()?;
            if state.owners.contains_key(&connection_id) {
                debug!("Connection {} already admitted", connection_id);
                return Ok(Admission {
                    evicted: None,
                    first_for_user: false,
                });
            }

            let sessions = state.users.entry(user_id.clone()).or_default();
            let first_for_user = sessions.is_empty();
            let evicted = if sessions.len() >= self.max_per_user {
                sessions.pop_front()
            } else {
                None
            };
            sessions.push_back(connection);

            if let Some(ref old) = evicted {
                state.owners.remove(&old.id);
            }
            state.owners.insert(connection_id.clone(), user_id.clone());
            (evicted, first_for_user)
        };

        if let Some(ref old) = evicted {
            info!(
                "User {} exceeded {} connections, replacing {} with {}",
                user_id, self.max_per_user, old.id, connection_id
            );
            old.send_event(&ServerEvent::connection_error(&RelayError::ConnectionReplaced));
            old.close(CLOSE_REPLACED, REPLACED_REASON);
        }

        Ok(Admission {
            evicted,
            first_for_user,
        })
    }

    /// Remove one session; a second call for the same connection is a no-op
    pub fn remove(&self, user_id: &str, connection_id: &str) -> Result<Removal> {
        let mut state = self.state.write()?;

        let owned = state
            .owners
            .get(connection_id)
            .map_or(false, |owner| owner == user_id);
        if !owned {
            return Ok(Removal {
                removed: false,
                user_now_offline: false,
            });
        }
        state.owners.remove(connection_id);

        let mut user_now_offline = false;
        if let Some(sessions) = state.users.get_mut(user_id) {
            sessions.retain(|c| c.id != connection_id);
            if sessions.is_empty() {
                state.users.remove(user_id);
                user_now_offline = true;
            }
        }

        Ok(Removal {
            removed: true,
            user_now_offline,
        })
    }

    pub fn is_online(&self, user_id: &str) -> Result<bool> {
        let state = self.state.read()?;
        Ok(state.users.get(user_id).map_or(false, |s| !s.is_empty()))
    }

    /// User owning a live connection
    pub fn owner_of(&self, connection_id: &str) -> Result<Option<String>> {
        let state = self.state.read()?;
        Ok(state.owners.get(connection_id).cloned())
    }

    /// Outbound channel of a live connection
    pub fn sender(&self, connection_id: &str) -> Result<Option<OutboundSender>> {
        let state = self.state.read()?;
        let sender = state.owners.get(connection_id).and_then(|user_id| {
            state.users.get(user_id).and_then(|sessions| {
                sessions
                    .iter()
                    .find(|c| c.id == connection_id)
                    .map(|c| c.sender.clone())
            })
        });
        Ok(sender)
    }

    /// Connection IDs of a user, oldest first
    pub fn sessions_for(&self, user_id: &str) -> Result<Vec<ConnectionId>> {
        let state = self.state.read()?;
        Ok(state
            .users
            .get(user_id)
            .map(|sessions| sessions.iter().map(|c| c.id.clone()).collect())
            .unwrap_or_default())
    }

    /// Sessions whose transport has already gone away
    pub fn dead_connections(&self) -> Result<Vec<(String, ConnectionId)>> {
        let state = self.state.read()?;
        Ok(state
            .users
            .values()
            .flatten()
            .filter(|c| c.is_closed())
            .map(|c| (c.user_id.clone(), c.id.clone()))
            .collect())
    }

    /// Remove every session, for shutdown
    pub fn drain(&self) -> Result<Vec<Connection>> {
        let mut state = self.state.write()?;
        state.owners.clear();
        Ok(state.users.drain().flat_map(|(_, sessions)| sessions).collect())
    }

    pub fn connection_count(&self) -> Result<usize> {
        Ok(self.state.read()?.owners.len())
    }

    pub fn user_count(&self) -> Result<usize> {
        Ok(self.state.read()?.users.len())
    }
}
