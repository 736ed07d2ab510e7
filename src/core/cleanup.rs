//! Periodic housekeeping
//!
//! Reclaims expired rate-limit and duplicate-suppression entries, removes
//! sessions whose socket died without a disconnect event, and settles overdue
//! presence transitions. Every component it touches already expires lazily,
//! so a late or skipped tick costs memory, never correctness.

use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::core::dedup::DuplicateSuppressor;
use crate::core::presence::PresenceTracker;
use crate::core::rate_limiter::EventRateLimiter;
use crate::core::registry::ConnectionRegistry;
use crate::core::room::RoomRouter;
use crate::error::Result;

/// What one sweep reclaimed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub rate_limit_entries: usize,
    pub dedup_entries: usize,
    pub dead_connections: usize,
    pub presence_settled: usize,
    pub presence_forgotten: usize,
}

pub struct CleanupScheduler {
    rate_limiter: Arc<EventRateLimiter>,
    dedup: Arc<DuplicateSuppressor>,
    registry: Arc<ConnectionRegistry>,
    router: Arc<RoomRouter>,
    presence: Arc<PresenceTracker>,
    interval: Duration,
    rate_limit_retention: Duration,
}

impl CleanupScheduler {
    pub fn new(
        rate_limiter: Arc<EventRateLimiter>,
        dedup: Arc<DuplicateSuppressor>,
        registry: Arc<ConnectionRegistry>,
        router: Arc<RoomRouter>,
        presence: Arc<PresenceTracker>,
        interval: Duration,
        rate_limit_retention: Duration,
    ) -> Self {
        Self {
            rate_limiter,
            dedup,
            registry,
            router,
            presence,
            interval,
            rate_limit_retention,
        }
    }

    /// Run one sweep
    pub async fn run_once(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport {
            rate_limit_entries: self.rate_limiter.purge_older_than(self.rate_limit_retention),
            dedup_entries: self.dedup.purge_expired(),
            ..CleanupReport::default()
        };

        // Sessions whose writer is gone missed their disconnect handler
        for (user_id, connection_id) in self.registry.dead_connections()? {
            let removal = self.registry.remove(&user_id, &connection_id)?;
            self.router.drop_connection(&connection_id)?;
            if removal.removed {
                report.dead_connections += 1;
                debug!("Reconciled dead connection {} of {}", connection_id, user_id);
            }
            if removal.user_now_offline {
                self.presence.disconnected(&user_id)?;
            }
        }

        report.presence_settled = self.presence.settle_pending().await?;
        report.presence_forgotten = self.presence.purge_idle()?;

        Ok(report)
    }

    /// Start the periodic sweep on the current runtime
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) if report != CleanupReport::default() => {
                        info!("Cleanup sweep: {:?}", report);
                    }
                    Ok(_) => debug!("Cleanup sweep found nothing to reclaim"),
                    Err(e) => error!("Cleanup sweep failed: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::{Clock, ManualClock};
    use crate::core::connection::Connection;
    use crate::core::rate_limiter::EventKind;
    use crate::core::room::RoomId;
    use crate::storage::InMemoryStore;
    use tokio::sync::mpsc;

    struct Fixture {
        clock: Arc<ManualClock>,
        limiter: Arc<EventRateLimiter>,
        dedup: Arc<DuplicateSuppressor>,
        registry: Arc<ConnectionRegistry>,
        router: Arc<RoomRouter>,
        presence: Arc<PresenceTracker>,
        scheduler: CleanupScheduler,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(EventRateLimiter::new(clock.clone()));
        let dedup = Arc::new(DuplicateSuppressor::new(Duration::from_millis(5000), clock.clone()));
        let registry = Arc::new(ConnectionRegistry::new(3));
        let router = Arc::new(RoomRouter::new(registry.clone()));
        let presence = Arc::new(PresenceTracker::new(
            registry.clone(),
            router.clone(),
            Arc::new(InMemoryStore::new()),
            clock.clone(),
            Duration::from_millis(10_000),
        ));
        let scheduler = CleanupScheduler::new(
            limiter.clone(),
            dedup.clone(),
            registry.clone(),
            router.clone(),
            presence.clone(),
            Duration::from_secs(300),
            Duration::from_secs(70),
        );
        Fixture {
            clock,
            limiter,
            dedup,
            registry,
            router,
            presence,
            scheduler,
        }
    }

    #[tokio::test]
    async fn test_sweep_purges_expired_entries() {
        let f = fixture();
        f.limiter
            .try_fire("alice", EventKind::TypingStart, "c1", Duration::from_millis(3000));
        f.dedup.check_and_record("alice", "hello", &[]);
        f.clock.advance(Duration::from_secs(71));

        let report = f.scheduler.run_once().await.unwrap();
        assert_eq!(report.rate_limit_entries, 1);
        assert_eq!(report.dedup_entries, 1);
        assert!(f.limiter.is_empty());
        assert!(f.dedup.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_reconciles_dead_connections() {
        let f = fixture();
        let (tx, rx) = mpsc::unbounded_channel();
        f.registry
            .admit(Connection::with_id("a1".to_string(), "alice".to_string(), tx, f.clock.now()))
            .unwrap();
        f.router.join_user_room("a1", "alice").unwrap();
        f.router.join_conversation("a1", "c1").unwrap();
        f.presence.connected("alice").await.unwrap();

        drop(rx);
        let report = f.scheduler.run_once().await.unwrap();
        assert_eq!(report.dead_connections, 1);
        assert!(!f.registry.is_online("alice").unwrap());
        assert!(f.router.rooms_of("a1").unwrap().is_empty());
        assert!(f.router.members(&RoomId::conversation("c1")).unwrap().is_empty());
        // Offline still honours the presence throttle
        assert_eq!(f.presence.pending_count().unwrap(), 1);

        f.clock.advance(Duration::from_secs(10));
        let report = f.scheduler.run_once().await.unwrap();
        assert_eq!(report.presence_settled, 1);
    }

    #[tokio::test]
    async fn test_sweep_leaves_live_state_alone() {
        let f = fixture();
        let (tx, _rx) = mpsc::unbounded_channel();
        f.registry
            .admit(Connection::with_id("a1".to_string(), "alice".to_string(), tx, f.clock.now()))
            .unwrap();
        f.dedup.check_and_record("alice", "hello", &[]);

        let report = f.scheduler.run_once().await.unwrap();
        assert_eq!(report, CleanupReport::default());
        assert!(f.registry.is_online("alice").unwrap());
        assert_eq!(f.dedup.len(), 1);
    }
}
