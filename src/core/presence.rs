//! Presence tracking
//!
//! Derives each user's online/offline status from registry occupancy and
//! decides which transitions are announced. Going online is announced as soon
//! as the first connection is admitted. Going offline is only announced once
//! the user has held no connection for the whole throttle interval and the
//! previous announcement is at least that old; a reconnect in between clears
//! the pending marker, so the re-check before emitting finds nothing to do.
//!
//! Announcements reach only users who share a conversation with the subject,
//! via their personal rooms.

use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::core::clock::SharedClock;
use crate::core::message_types::ServerEvent;
use crate::core::registry::ConnectionRegistry;
use crate::core::room::{RoomId, RoomRouter};
use crate::error::Result;
use crate::storage::ConversationDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Offline,
    Online,
}

/// Outcome of re-checking a pending offline transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Offline was confirmed and announced
    WentOffline,
    /// Nothing pending any more (reconnected, or already settled)
    Cancelled,
    /// Still pending; check again after the given delay
    NotYetDue(Duration),
}

#[derive(Debug, Clone)]
struct PresenceState {
    /// Last announced status
    status: PresenceStatus,
    last_transition_at: Option<Instant>,
    /// Set when the connection set became empty
    offline_since: Option<Instant>,
    /// User asked to appear offline while connected
    hidden: bool,
}

impl PresenceState {
    fn new() -> Self {
        Self {
            status: PresenceStatus::Offline,
            last_transition_at: None,
            offline_since: None,
            hidden: false,
        }
    }
}

pub struct PresenceTracker {
    states: Mutex<HashMap<String, PresenceState>>,
    registry: Arc<ConnectionRegistry>,
    router: Arc<RoomRouter>,
    directory: Arc<dyn ConversationDirectory>,
    clock: SharedClock,
    throttle: Duration,
}

impl PresenceTracker {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        router: Arc<RoomRouter>,
        directory: Arc<dyn ConversationDirectory>,
        clock: SharedClock,
        throttle: Duration,
    ) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            registry,
            router,
            directory,
            clock,
            throttle,
        }
    }

    /// Last announced status
    pub fn status(&self, user_id: &str) -> Result<PresenceStatus> {
        let states = self.states.lock()?;
        Ok(states
            .get(user_id)
            .map_or(PresenceStatus::Offline, |s| s.status))
    }

    pub fn is_online(&self, user_id: &str) -> Result<bool> {
        Ok(self.status(user_id)? == PresenceStatus::Online)
    }

    /// Users whose offline announcement is still pending
    pub fn pending_count(&self) -> Result<usize> {
        let states = self.states.lock()?;
        Ok(states.values().filter(|s| s.offline_since.is_some()).count())
    }

    /// A connection for `user_id` was admitted
    pub async fn connected(&self, user_id: &str) -> Result<()> {
        let went_online = {
            let mut states = self.states.lock()?;
            let now = self.clock.now();
            let state = states
                .entry(user_id.to_string())
                .or_insert_with(PresenceState::new);
            if state.offline_since.take().is_some() {
                debug!("Reconnect cancelled pending offline for {}", user_id);
            }
            if state.status == PresenceStatus::Offline && !state.hidden {
                state.status = PresenceStatus::Online;
                state.last_transition_at = Some(now);
                true
            } else {
                false
            }
        };

        if went_online {
            self.announce(user_id, PresenceStatus::Online).await;
        }
        Ok(())
    }

    /// The user's last connection went away; the offline announcement waits
    /// for `settle`
    pub fn disconnected(&self, user_id: &str) -> Result<()> {
        let mut states = self.states.lock()?;
        let now = self.clock.now();
        let state = states
            .entry(user_id.to_string())
            .or_insert_with(PresenceState::new);
        if state.offline_since.is_none() {
            state.offline_since = Some(now);
        }
        Ok(())
    }

    /// Re-check a pending offline transition and announce it if it is due
    pub async fn settle(&self, user_id: &str) -> Result<SettleOutcome> {
        // Registry read happens before taking our own lock
        let still_connected = self.registry.is_online(user_id)?;

        let outcome = {
            let mut states = self.states.lock()?;
            let now = self.clock.now();
            match states.get_mut(user_id) {
                None => SettleOutcome::Cancelled,
                Some(state) => match state.offline_since {
                    None => SettleOutcome::Cancelled,
                    Some(_) if still_connected => {
                        state.offline_since = None;
                        SettleOutcome::Cancelled
                    }
                    Some(since) => {
                        let empty_for = now.saturating_duration_since(since);
                        let since_transition = state
                            .last_transition_at
                            .map_or(self.throttle, |t| now.saturating_duration_since(t));
                        let wait = self
                            .throttle
                            .saturating_sub(empty_for)
                            .max(self.throttle.saturating_sub(since_transition));

                        if !wait.is_zero() {
                            SettleOutcome::NotYetDue(wait)
                        } else {
                            state.offline_since = None;
                            state.hidden = false;
                            if state.status == PresenceStatus::Online {
                                state.status = PresenceStatus::Offline;
                                state.last_transition_at = Some(now);
                                SettleOutcome::WentOffline
                            } else {
                                // Already announced offline via presence toggle
                                SettleOutcome::Cancelled
                            }
                        }
                    }
                },
            }
        };

        if outcome == SettleOutcome::WentOffline {
            self.announce(user_id, PresenceStatus::Offline).await;
        }
        Ok(outcome)
    }

    /// Settle every pending user; returns how many went offline
    pub async fn settle_pending(&self) -> Result<usize> {
        let pending: Vec<String> = {
            let states = self.states.lock()?;
            states
                .iter()
                .filter(|(_, s)| s.offline_since.is_some())
                .map(|(user_id, _)| user_id.clone())
                .collect()
        };

        let mut went_offline = 0;
        for user_id in pending {
            if self.settle(&user_id).await? == SettleOutcome::WentOffline {
                went_offline += 1;
            }
        }
        Ok(went_offline)
    }

    /// Explicit presence toggle from a connected client
    pub async fn set_visible(&self, user_id: &str, visible: bool) -> Result<()> {
        let connected = self.registry.is_online(user_id)?;
        let transition = {
            let mut states = self.states.lock()?;
            let now = self.clock.now();
            let state = states
                .entry(user_id.to_string())
                .or_insert_with(PresenceState::new);
            state.hidden = !visible;

            match (visible && connected, state.status) {
                (true, PresenceStatus::Offline) => {
                    state.status = PresenceStatus::Online;
                    state.last_transition_at = Some(now);
                    Some(PresenceStatus::Online)
                }
                (false, PresenceStatus::Online) => {
                    state.status = PresenceStatus::Offline;
                    state.last_transition_at = Some(now);
                    Some(PresenceStatus::Offline)
                }
                _ => None,
            }
        };

        if let Some(status) = transition {
            self.announce(user_id, status).await;
        }
        Ok(())
    }

    /// Forget offline users whose last transition is older than the throttle
    pub fn purge_idle(&self) -> Result<usize> {
        let mut states = self.states.lock()?;
        let now = self.clock.now();
        let throttle = self.throttle;
        let before = states.len();
        states.retain(|_, s| {
            s.status == PresenceStatus::Online
                || s.offline_since.is_some()
                || s.hidden
                || s
                    .last_transition_at
                    .map_or(false, |t| now.saturating_duration_since(t) < throttle)
        });
        Ok(before - states.len())
    }

    /// Spawn the delayed re-check for a user who just went empty
    pub fn schedule_settle(self: &Arc<Self>, user_id: String) {
        let tracker = Arc::clone(self);
        let mut delay = self.throttle;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;
                match tracker.settle(&user_id).await {
                    Ok(SettleOutcome::NotYetDue(remaining)) => delay = remaining,
                    Ok(_) => break,
                    Err(e) => {
                        warn!("Failed to settle presence for {}: {}", user_id, e);
                        break;
                    }
                }
            }
        });
    }

    async fn announce(&self, user_id: &str, status: PresenceStatus) {
        let peers = match self.directory.co_participants(user_id).await {
            Ok(peers) => peers,
            Err(e) => {
                warn!("Participant lookup failed for {}: {}", user_id, e);
                return;
            }
        };

        let timestamp = Utc::now();
        let event = match status {
            PresenceStatus::Online => ServerEvent::UserOnline {
                user_id: user_id.to_string(),
                timestamp,
            },
            PresenceStatus::Offline => ServerEvent::UserOffline {
                user_id: user_id.to_string(),
                timestamp,
            },
        };

        let mut delivered = 0;
        for peer in &peers {
            match self.router.broadcast(&RoomId::user(peer), &event, None) {
                Ok(count) => delivered += count,
                Err(e) => warn!("Failed to announce {} to {}: {}", event.name(), peer, e),
            }
        }
        info!(
            "User {} is now {:?}; notified {} connections of {} peers",
            user_id,
            status,
            delivered,
            peers.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::{Clock, ManualClock};
    use crate::core::connection::Connection;
    use crate::storage::InMemoryStore;
    use tokio::sync::mpsc;
    use warp::ws::Message;

    struct Fixture {
        clock: Arc<ManualClock>,
        registry: Arc<ConnectionRegistry>,
        router: Arc<RoomRouter>,
        tracker: Arc<PresenceTracker>,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let registry = Arc::new(ConnectionRegistry::new(3));
        let router = Arc::new(RoomRouter::new(registry.clone()));
        let store = Arc::new(InMemoryStore::new());
        store
            .create_conversation("c1", &["alice".to_string(), "bob".to_string()])
            .await;
        let tracker = Arc::new(PresenceTracker::new(
            registry.clone(),
            router.clone(),
            store,
            clock.clone(),
            Duration::from_millis(10_000),
        ));
        Fixture {
            clock,
            registry,
            router,
            tracker,
        }
    }

    fn attach(f: &Fixture, conn_id: &str, user_id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        f.registry
            .admit(Connection::with_id(
                conn_id.to_string(),
                user_id.to_string(),
                tx,
                f.clock.now(),
            ))
            .unwrap();
        f.router.join_user_room(conn_id, user_id).unwrap();
        rx
    }

    fn detach(f: &Fixture, conn_id: &str, user_id: &str) {
        f.registry.remove(user_id, conn_id).unwrap();
        f.router.drop_connection(conn_id).unwrap();
        f.tracker.disconnected(user_id).unwrap();
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg.to_str().unwrap_or_default().to_string());
        }
        out
    }

    #[tokio::test]
    async fn test_first_connection_announces_online_to_peers() {
        let f = fixture().await;
        let mut bob = attach(&f, "b1", "bob");
        let _alice = attach(&f, "a1", "alice");

        f.tracker.connected("alice").await.unwrap();
        assert!(f.tracker.is_online("alice").unwrap());

        let frames = drain(&mut bob);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("user_online"));
        assert!(frames[0].contains("alice"));
    }

    #[tokio::test]
    async fn test_offline_waits_for_throttle() {
        let f = fixture().await;
        let mut bob = attach(&f, "b1", "bob");
        let _alice = attach(&f, "a1", "alice");
        f.tracker.connected("alice").await.unwrap();
        drain(&mut bob);

        detach(&f, "a1", "alice");
        f.clock.advance_ms(9_999);
        assert!(matches!(
            f.tracker.settle("alice").await.unwrap(),
            SettleOutcome::NotYetDue(_)
        ));
        assert!(drain(&mut bob).is_empty());

        f.clock.advance_ms(1);
        assert_eq!(f.tracker.settle("alice").await.unwrap(), SettleOutcome::WentOffline);
        let frames = drain(&mut bob);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("user_offline"));
        assert!(!f.tracker.is_online("alice").unwrap());
    }

    #[tokio::test]
    async fn test_reconnect_inside_window_cancels_offline() {
        let f = fixture().await;
        let mut bob = attach(&f, "b1", "bob");
        let _a1 = attach(&f, "a1", "alice");
        f.tracker.connected("alice").await.unwrap();
        drain(&mut bob);

        detach(&f, "a1", "alice");
        f.clock.advance_ms(4_000);
        let _a2 = attach(&f, "a2", "alice");
        f.tracker.connected("alice").await.unwrap();

        f.clock.advance_ms(20_000);
        assert_eq!(f.tracker.settle("alice").await.unwrap(), SettleOutcome::Cancelled);
        assert_eq!(f.tracker.settle_pending().await.unwrap(), 0);
        // Neither offline nor a second online was observed
        assert!(drain(&mut bob).is_empty());
        assert!(f.tracker.is_online("alice").unwrap());
    }

    #[tokio::test]
    async fn test_settle_pending_sweeps_due_users() {
        let f = fixture().await;
        let _a1 = attach(&f, "a1", "alice");
        f.tracker.connected("alice").await.unwrap();
        detach(&f, "a1", "alice");
        assert_eq!(f.tracker.pending_count().unwrap(), 1);

        f.clock.advance_ms(10_000);
        assert_eq!(f.tracker.settle_pending().await.unwrap(), 1);
        assert_eq!(f.tracker.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hidden_user_appears_offline() {
        let f = fixture().await;
        let mut bob = attach(&f, "b1", "bob");
        let _a1 = attach(&f, "a1", "alice");
        f.tracker.connected("alice").await.unwrap();
        drain(&mut bob);

        f.tracker.set_visible("alice", false).await.unwrap();
        assert!(!f.tracker.is_online("alice").unwrap());
        assert!(drain(&mut bob)[0].contains("user_offline"));

        // Another tab while hidden stays quiet
        let _a2 = attach(&f, "a2", "alice");
        f.tracker.connected("alice").await.unwrap();
        assert!(drain(&mut bob).is_empty());

        f.tracker.set_visible("alice", true).await.unwrap();
        assert!(drain(&mut bob)[0].contains("user_online"));
    }

    #[tokio::test]
    async fn test_non_peers_are_not_notified() {
        let f = fixture().await;
        let mut carol = attach(&f, "c1", "carol");
        let _a1 = attach(&f, "a1", "alice");
        f.tracker.connected("alice").await.unwrap();
        assert!(drain(&mut carol).is_empty());
    }

    #[tokio::test]
    async fn test_purge_idle_keeps_recent_and_online() {
        let f = fixture().await;
        let _a1 = attach(&f, "a1", "alice");
        f.tracker.connected("alice").await.unwrap();
        detach(&f, "a1", "alice");
        f.clock.advance_ms(10_000);
        f.tracker.settle("alice").await.unwrap();

        assert_eq!(f.tracker.purge_idle().unwrap(), 0);
        f.clock.advance_ms(10_000);
        assert_eq!(f.tracker.purge_idle().unwrap(), 1);
    }
}
