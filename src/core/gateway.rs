//! Event gateway
//!
//! Entry point for everything a socket does after the upgrade: resolves the
//! credential, admits the connection, and dispatches each inbound event
//! through the rate limiter, duplicate suppressor and room router. Errors are
//! reported to the originating connection only.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::auth::IdentityResolver;
use crate::config::{ServerConfig, Thresholds};
use crate::constants::MAX_FRAME_SIZE;
use crate::core::cleanup::CleanupScheduler;
use crate::core::clock::{system_clock, SharedClock};
use crate::core::connection::{Connection, OutboundSender};
use crate::core::dedup::DuplicateSuppressor;
use crate::core::message::{Attachment, ChatMessage};
use crate::core::message_types::{ClientEvent, ServerEvent};
use crate::core::presence::PresenceTracker;
use crate::core::rate_limiter::{EventKind, EventRateLimiter};
use crate::core::registry::ConnectionRegistry;
use crate::core::room::{RoomId, RoomRouter};
use crate::error::{RelayError, Result};
use crate::storage::{ConversationDirectory, MessageStore};

/// Close code sent to every socket when the server stops
const CLOSE_GOING_AWAY: u16 = 1001;

/// Point-in-time counters for the health endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub connections: usize,
    pub users: usize,
    pub rooms: usize,
}

pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    router: Arc<RoomRouter>,
    rate_limiter: Arc<EventRateLimiter>,
    dedup: Arc<DuplicateSuppressor>,
    presence: Arc<PresenceTracker>,
    cleanup: Arc<CleanupScheduler>,
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn ConversationDirectory>,
    resolver: Arc<dyn IdentityResolver>,
    thresholds: Thresholds,
    clock: SharedClock,
    handshake_timeout: Duration,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
}

pub type SharedGateway = Arc<Gateway>;

impl Gateway {
    pub fn new(
        config: &ServerConfig,
        resolver: Arc<dyn IdentityResolver>,
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn ConversationDirectory>,
    ) -> Self {
        Self::with_clock(config, resolver, store, directory, system_clock())
    }

    pub fn with_clock(
        config: &ServerConfig,
        resolver: Arc<dyn IdentityResolver>,
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn ConversationDirectory>,
        clock: SharedClock,
    ) -> Self {
        let thresholds = config.thresholds.clone();

        let registry = Arc::new(ConnectionRegistry::new(thresholds.max_connections_per_user));
        let router = Arc::new(RoomRouter::new(registry.clone()));
        let rate_limiter = Arc::new(EventRateLimiter::new(clock.clone()));
        let dedup = Arc::new(DuplicateSuppressor::new(
            thresholds.duplicate_window,
            clock.clone(),
        ));
        let presence = Arc::new(PresenceTracker::new(
            registry.clone(),
            router.clone(),
            directory.clone(),
            clock.clone(),
            thresholds.presence_throttle,
        ));
        let cleanup = Arc::new(CleanupScheduler::new(
            rate_limiter.clone(),
            dedup.clone(),
            registry.clone(),
            router.clone(),
            presence.clone(),
            thresholds.cleanup_interval,
            thresholds.rate_limit_retention(),
        ));

        Self {
            registry,
            router,
            rate_limiter,
            dedup,
            presence,
            cleanup,
            store,
            directory,
            resolver,
            thresholds,
            clock,
            handshake_timeout: config.handshake_timeout,
            cleanup_handle: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<RoomRouter> {
        &self.router
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn cleanup(&self) -> &Arc<CleanupScheduler> {
        &self.cleanup
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Resolve a credential to a user ID within the handshake deadline
    pub async fn authenticate(&self, credential: &str) -> Result<String> {
        match timeout(self.handshake_timeout, self.resolver.resolve(credential)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::HandshakeTimeout),
        }
    }

    /// Admit an authenticated socket and place it in its owner's personal room
    pub async fn connect(&self, user_id: &str, sender: OutboundSender) -> Result<Connection> {
        let connection = Connection::new(user_id.to_string(), sender, self.clock.now());
        let admission = self.registry.admit(connection.clone())?;

        if let Some(evicted) = admission.evicted {
            self.router.drop_connection(&evicted.id)?;
        }
        self.router.join_user_room(&connection.id, user_id)?;

        connection.send_event(&ServerEvent::Connected {
            user_id: user_id.to_string(),
            connection_id: connection.id.clone(),
        });
        self.presence.connected(user_id).await?;

        info!("User {} connected as {}", user_id, connection.id);
        Ok(connection)
    }

    /// Tear down a connection; safe to call more than once
    pub fn disconnect(&self, connection: &Connection) -> Result<()> {
        let removal = self.registry.remove(&connection.user_id, &connection.id)?;
        let rooms = self.router.drop_connection(&connection.id)?;

        if removal.user_now_offline {
            self.presence.disconnected(&connection.user_id)?;
            self.presence.schedule_settle(connection.user_id.clone());
        }

        if removal.removed {
            info!(
                "Connection {} of {} closed, left {} rooms",
                connection.id,
                connection.user_id,
                rooms.len()
            );
        }
        Ok(())
    }

    /// Process one inbound text frame
    pub async fn handle_text(&self, connection: &Connection, text: &str) {
        if text.len() > MAX_FRAME_SIZE {
            warn!(
                "Oversized frame from {}: {} bytes",
                connection.id,
                text.len()
            );
            let err = RelayError::MessageParseError(format!("Frame too large: {} bytes", text.len()));
            connection.send_event(&ServerEvent::connection_error(&err));
            return;
        }

        let event = match ClientEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                debug!("Unparseable frame from {}: {}", connection.id, e);
                connection.send_event(&ServerEvent::connection_error(&e));
                return;
            }
        };

        if let Err(e) = self.dispatch(connection, event).await {
            match e {
                RelayError::LockPoisoned(_) => error!("Dispatch failed for {}: {}", connection.id, e),
                _ => debug!("Rejected event from {}: {}", connection.id, e),
            }
        }
    }

    /// Route a parsed event; failures are reported to the originating
    /// connection before being returned
    pub async fn dispatch(&self, connection: &Connection, event: ClientEvent) -> Result<()> {
        // An evicted session may still have frames in flight
        match self.registry.owner_of(&connection.id)? {
            Some(owner) if owner == connection.user_id => {}
            _ => {
                debug!("Ignoring event from retired connection {}", connection.id);
                return Ok(());
            }
        }

        let result = match event {
            ClientEvent::Authenticate { .. } => {
                debug!("Connection {} already authenticated", connection.id);
                Ok(())
            }
            ClientEvent::JoinConversation { conversation_id } => {
                self.join_conversation(connection, &conversation_id).await
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                self.leave_conversation(connection, &conversation_id)
            }
            ClientEvent::SendMessage {
                conversation_id,
                content,
                attachments,
            } => {
                return self
                    .send_message(connection, conversation_id.clone(), content, attachments)
                    .await
                    .map_err(|e| {
                        connection.send_event(&ServerEvent::message_error(Some(conversation_id), &e));
                        e
                    });
            }
            ClientEvent::TypingStart { conversation_id } => {
                self.typing(connection, &conversation_id, true)
            }
            ClientEvent::TypingStop { conversation_id } => {
                self.typing(connection, &conversation_id, false)
            }
            ClientEvent::MarkMessageRead { message_id } => {
                return self.mark_read(connection, &message_id).await.map_err(|e| {
                    connection.send_event(&ServerEvent::message_error(None, &e));
                    e
                });
            }
            ClientEvent::SetPresence { online } => self.set_presence(connection, online).await,
        };

        result.map_err(|e| {
            connection.send_event(&ServerEvent::connection_error(&e));
            e
        })
    }

    async fn join_conversation(&self, connection: &Connection, conversation_id: &str) -> Result<()> {
        if !self.rate_limiter.try_fire(
            &connection.user_id,
            EventKind::JoinConversation,
            &membership_scope(connection, conversation_id),
            EventKind::JoinConversation.min_interval(&self.thresholds),
        ) {
            debug!("Join throttled for {}", connection.user_id);
            return Ok(());
        }

        if !self
            .directory
            .is_participant(conversation_id, &connection.user_id)
            .await?
        {
            return Err(RelayError::NotInConversation(conversation_id.to_string()));
        }

        let joined = self.router.join_conversation(&connection.id, conversation_id)?;

        // The socket may have closed while the lookup was in flight
        if self.registry.owner_of(&connection.id)?.is_none() {
            self.router.drop_connection(&connection.id)?;
            return Ok(());
        }

        if joined {
            self.router.broadcast(
                &RoomId::conversation(conversation_id),
                &ServerEvent::UserJoinedConversation {
                    conversation_id: conversation_id.to_string(),
                    user_id: connection.user_id.clone(),
                },
                Some(&connection.id),
            )?;
        }
        Ok(())
    }

    fn leave_conversation(&self, connection: &Connection, conversation_id: &str) -> Result<()> {
        if !self.rate_limiter.try_fire(
            &connection.user_id,
            EventKind::LeaveConversation,
            &membership_scope(connection, conversation_id),
            EventKind::LeaveConversation.min_interval(&self.thresholds),
        ) {
            debug!("Leave throttled for {}", connection.user_id);
            return Ok(());
        }

        if self.router.leave_conversation(&connection.id, conversation_id)? {
            self.router.broadcast(
                &RoomId::conversation(conversation_id),
                &ServerEvent::UserLeftConversation {
                    conversation_id: conversation_id.to_string(),
                    user_id: connection.user_id.clone(),
                },
                None,
            )?;
        }
        Ok(())
    }

    fn validate_message(&self, content: &str, attachments: &[Attachment]) -> Result<()> {
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(RelayError::EmptyMessage);
        }
        let length = content.chars().count();
        if length > self.thresholds.max_message_length {
            return Err(RelayError::MessageTooLong(length));
        }
        if attachments.len() > self.thresholds.max_attachments {
            return Err(RelayError::TooManyAttachments(attachments.len()));
        }
        Ok(())
    }

    async fn send_message(
        &self,
        connection: &Connection,
        conversation_id: String,
        content: String,
        attachments: Vec<Attachment>,
    ) -> Result<()> {
        self.validate_message(&content, &attachments)?;

        if !self
            .directory
            .is_participant(&conversation_id, &connection.user_id)
            .await?
        {
            return Err(RelayError::NotInConversation(conversation_id));
        }

        if self
            .dedup
            .check_and_record(&connection.user_id, &content, &attachments)
        {
            info!("Duplicate message from {} suppressed", connection.user_id);
            return Err(RelayError::DuplicateMessage);
        }

        let message = ChatMessage::new(
            conversation_id,
            connection.user_id.clone(),
            content,
            attachments,
        );

        let delivered = self.router.broadcast(
            &RoomId::conversation(&message.conversation_id),
            &ServerEvent::NewMessage(message.clone()),
            None,
        )?;
        connection.send_event(&ServerEvent::MessageSent {
            message_id: message.id.to_string(),
            conversation_id: message.conversation_id.clone(),
            created_at: message.created_at,
        });
        debug!(
            "Message {} from {} delivered to {} connections",
            message.id, message.sender_id, delivered
        );

        // Persistence never gates delivery
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.append_message(&message).await {
                error!("Failed to persist message {}: {}", message.id, e);
            }
        });
        Ok(())
    }

    fn typing(&self, connection: &Connection, conversation_id: &str, is_typing: bool) -> Result<()> {
        let room = RoomId::conversation(conversation_id);
        if !self.router.is_member(&connection.id, &room)? {
            return Err(RelayError::NotInConversation(conversation_id.to_string()));
        }

        let kind = if is_typing {
            EventKind::TypingStart
        } else {
            EventKind::TypingStop
        };
        if !self.rate_limiter.try_fire(
            &connection.user_id,
            kind,
            conversation_id,
            kind.min_interval(&self.thresholds),
        ) {
            return Ok(());
        }

        self.router.broadcast(
            &room,
            &ServerEvent::UserTyping {
                conversation_id: conversation_id.to_string(),
                user_id: connection.user_id.clone(),
                is_typing,
            },
            Some(&connection.id),
        )?;
        Ok(())
    }

    async fn mark_read(&self, connection: &Connection, message_id: &str) -> Result<()> {
        let receipt = self.store.mark_read(message_id, &connection.user_id).await?;
        let room = RoomId::conversation(&receipt.conversation_id);
        self.router.broadcast(&room, &ServerEvent::MessageRead(receipt), None)?;
        Ok(())
    }

    async fn set_presence(&self, connection: &Connection, online: bool) -> Result<()> {
        let kind = EventKind::PresenceToggle;
        if !self
            .rate_limiter
            .try_fire(&connection.user_id, kind, "", kind.min_interval(&self.thresholds))
        {
            debug!("Presence toggle throttled for {}", connection.user_id);
            return Ok(());
        }
        self.presence.set_visible(&connection.user_id, online).await
    }

    /// Tell every participant about a conversation created elsewhere
    pub fn notify_conversation_created(
        &self,
        conversation_id: &str,
        participants: &[String],
        created_by: Option<&str>,
    ) -> Result<usize> {
        let event = ServerEvent::ConversationCreated {
            conversation_id: conversation_id.to_string(),
            participants: participants.to_vec(),
            created_by: created_by.map(str::to_string),
        };

        let mut delivered = 0;
        for participant in participants {
            delivered += self.router.broadcast(&RoomId::user(participant), &event, None)?;
        }
        Ok(delivered)
    }

    pub fn stats(&self) -> Result<GatewayStats> {
        Ok(GatewayStats {
            connections: self.registry.connection_count()?,
            users: self.registry.user_count()?,
            rooms: self.router.room_count()?,
        })
    }

    /// Start the periodic cleanup sweep; a second call is a no-op
    pub fn start_cleanup(&self) -> Result<()> {
        let mut handle = self.cleanup_handle.lock()?;
        if handle.is_none() {
            *handle = Some(self.cleanup.clone().start());
            info!(
                "Cleanup sweep every {:?}",
                self.thresholds.cleanup_interval
            );
        }
        Ok(())
    }

    /// Stop housekeeping and close every open socket
    pub fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.cleanup_handle.lock()?.take() {
            handle.abort();
        }

        let connections = self.registry.drain()?;
        for connection in &connections {
            self.router.drop_connection(&connection.id)?;
            connection.close(CLOSE_GOING_AWAY, "server shutting down");
        }
        info!("Gateway shut down, closed {} connections", connections.len());
        Ok(())
    }
}

/// Join/leave throttling is per tab and conversation
fn membership_scope(connection: &Connection, conversation_id: &str) -> String {
    format!("{}/{}", connection.id, conversation_id)
}
