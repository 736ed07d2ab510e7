//! WebSocket connection handle
//! The outbound half of one live socket, as seen by the rest of the core

use log::{debug, warn};
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::ws::Message;

use crate::core::message_types::ServerEvent;

pub type ConnectionId = String;
pub type OutboundSender = mpsc::UnboundedSender<Message>;

/// Close code used when a session is evicted by a newer one
pub const CLOSE_REPLACED: u16 = 4000;

/// Server-side record of one live connection
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: String,
    pub sender: OutboundSender,
    pub connected_at: Instant,
}

impl Connection {
    /// Create a new connection with a unique ID
    pub fn new(user_id: String, sender: OutboundSender, connected_at: Instant) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), user_id, sender, connected_at)
    }

    pub fn with_id(
        id: ConnectionId,
        user_id: String,
        sender: OutboundSender,
        connected_at: Instant,
    ) -> Self {
        Self {
            id,
            user_id,
            sender,
            connected_at,
        }
    }

    /// Queue a text frame; false when the socket is already gone
    pub fn send_text(&self, text: &str) -> bool {
        match self.sender.send(Message::text(text)) {
            Ok(_) => true,
            Err(_) => {
                debug!("Dropped frame for closed connection {}", self.id);
                false
            }
        }
    }

    pub fn send_event(&self, event: &ServerEvent) -> bool {
        match event.to_text() {
            Ok(text) => self.send_text(&text),
            Err(e) => {
                warn!("Failed to encode {} for {}: {}", event.name(), self.id, e);
                false
            }
        }
    }

    /// Queue a close frame; the writer task shuts the socket after flushing
    pub fn close(&self, code: u16, reason: &str) {
        if self
            .sender
            .send(Message::close_with(code, reason.to_string()))
            .is_err()
        {
            debug!("Connection {} already closed", self.id);
        }
    }

    /// True once the writer side has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
