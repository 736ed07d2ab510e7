//! Rate limiting module for high-frequency client actions

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

use crate::config::Thresholds;
use crate::core::clock::SharedClock;

/// Throttled action families; each is limited independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TypingStart,
    TypingStop,
    JoinConversation,
    LeaveConversation,
    PresenceToggle,
}

impl EventKind {
    /// Minimum spacing configured for this family
    pub fn min_interval(&self, thresholds: &Thresholds) -> Duration {
        match self {
            Self::TypingStart | Self::TypingStop => thresholds.typing_interval,
            Self::JoinConversation | Self::LeaveConversation => thresholds.join_leave_interval,
            Self::PresenceToggle => thresholds.presence_toggle_interval,
        }
    }
}

/// (user, event kind, scope); scope narrows a family to one conversation or
/// connection, and is empty for user-wide families
type RateKey = (String, EventKind, String);

/// Minimum-interval gate per (user, event kind, scope)
pub struct EventRateLimiter {
    last_fired: DashMap<RateKey, std::time::Instant>,
    clock: SharedClock,
}

impl EventRateLimiter {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            last_fired: DashMap::new(),
            clock,
        }
    }

    /// Allow and record the attempt if enough time has passed, otherwise deny
    /// without touching the stored timestamp
    pub fn try_fire(
        &self,
        user_id: &str,
        kind: EventKind,
        scope: &str,
        min_interval: Duration,
    ) -> bool {
        let now = self.clock.now();
        match self
            .last_fired
            .entry((user_id.to_string(), kind, scope.to_string()))
        {
            Entry::Occupied(mut entry) => {
                if now.saturating_duration_since(*entry.get()) >= min_interval {
                    entry.insert(now);
                    true
                } else {
                    log::trace!("Rate limited {:?} for user {} ({})", kind, user_id, scope);
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Drop entries that can no longer deny anything
    pub fn purge_older_than(&self, horizon: Duration) -> usize {
        let now = self.clock.now();
        let before = self.last_fired.len();
        self.last_fired
            .retain(|_, fired_at| now.saturating_duration_since(*fired_at) < horizon);
        before.saturating_sub(self.last_fired.len())
    }

    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }
}
