use std::collections::VecDeque;
use std::time::{Duration, Instant};

use swarmq_common::Identity;
use tracing::info;

/// A worker waiting for its next request, with the deadline after which
/// its silence counts as death.
#[derive(Debug, Clone)]
struct IdleWorker {
    identity: Identity,
    expires_at: Instant,
}

/// Pool of workers ready to take a request, dispatched least recently
/// used: the longest-idle worker sits at the front of the queue.
///
/// A worker enters the pool when it signals readiness (a fresh `READY` or
/// a heartbeat, or by delivering a reply) and leaves it when a request is
/// dispatched to it or its expiry passes without a sign of life.
pub struct WorkerRegistry {
    liveness_window: Duration,
    idle: VecDeque<IdleWorker>,
}

impl WorkerRegistry {
    /// `liveness_window` is how long a pooled worker may stay silent
    /// before being purged, normally `liveness * heartbeat_interval`.
    pub fn new(liveness_window: Duration) -> Self {
        Self {
            liveness_window,
            idle: VecDeque::new(),
        }
    }

    /// Marks `identity` as ready, refreshing its expiry.
    ///
    /// A worker already in the pool keeps its queue position; the refresh
    /// only pushes out its deadline. A worker not in the pool joins at the
    /// back, making it the most recently used.
    pub fn register_or_refresh(&mut self, identity: &Identity, now: Instant) {
        let expires_at = now + self.liveness_window;
        if let Some(entry) = self.idle.iter_mut().find(|w| &w.identity == identity) {
            entry.expires_at = expires_at;
            return;
        }
        self.idle.push_back(IdleWorker {
            identity: identity.clone(),
            expires_at,
        });
    }

    /// Pops the longest-idle worker, or `None` when the pool is empty.
    pub fn next_available(&mut self) -> Option<Identity> {
        self.idle.pop_front().map(|w| w.identity)
    }

    /// Drops every worker whose expiry has passed, returning the evicted
    /// identities so the caller can log or account for them.
    pub fn purge(&mut self, now: Instant) -> Vec<Identity> {
        let mut evicted = Vec::new();
        self.idle.retain(|w| {
            if now >= w.expires_at {
                evicted.push(w.identity.clone());
                false
            } else {
                true
            }
        });
        for identity in &evicted {
            info!(worker = %identity, "worker expired, removing from pool");
        }
        evicted
    }

    /// Identities currently pooled, front (longest idle) first. The broker
    /// heartbeats these on its heartbeat cadence.
    pub fn identities(&self) -> Vec<Identity> {
        self.idle.iter().map(|w| w.identity.clone()).collect()
    }

    pub fn available(&self) -> usize {
        self.idle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idle.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(Duration::from_millis(1500))
    }

    #[test]
    fn test_dispatch_is_least_recently_used() {
        let mut reg = registry();
        let now = Instant::now();
        reg.register_or_refresh(&Identity::from("W1"), now);
        reg.register_or_refresh(&Identity::from("W2"), now);
        reg.register_or_refresh(&Identity::from("W3"), now);

        assert_eq!(reg.next_available(), Some(Identity::from("W1")));
        assert_eq!(reg.next_available(), Some(Identity::from("W2")));

        // W1 comes back after finishing; it now queues behind W3.
        reg.register_or_refresh(&Identity::from("W1"), now);
        assert_eq!(reg.next_available(), Some(Identity::from("W3")));
        assert_eq!(reg.next_available(), Some(Identity::from("W1")));
        assert_eq!(reg.next_available(), None);
    }

    #[test]
    fn test_refresh_keeps_queue_position() {
        let mut reg = registry();
        let now = Instant::now();
        reg.register_or_refresh(&Identity::from("W1"), now);
        reg.register_or_refresh(&Identity::from("W2"), now);

        // A heartbeat from W1 must not demote it behind W2.
        reg.register_or_refresh(&Identity::from("W1"), now + Duration::from_millis(100));
        assert_eq!(reg.next_available(), Some(Identity::from("W1")));
        assert_eq!(reg.next_available(), Some(Identity::from("W2")));
    }

    #[test]
    fn test_purge_evicts_expired_workers_only() {
        let mut reg = registry();
        let start = Instant::now();
        reg.register_or_refresh(&Identity::from("W1"), start);
        reg.register_or_refresh(&Identity::from("W2"), start);

        // W2 heartbeats at the one second mark, W1 stays silent.
        reg.register_or_refresh(&Identity::from("W2"), start + Duration::from_millis(1000));

        let evicted = reg.purge(start + Duration::from_millis(2000));
        assert_eq!(evicted, vec![Identity::from("W1")]);
        assert_eq!(reg.available(), 1);
        assert_eq!(reg.next_available(), Some(Identity::from("W2")));
    }

    #[test]
    fn test_purge_at_exact_expiry_evicts() {
        let mut reg = registry();
        let start = Instant::now();
        reg.register_or_refresh(&Identity::from("W1"), start);

        assert!(reg.purge(start + Duration::from_millis(1499)).is_empty());
        assert_eq!(
            reg.purge(start + Duration::from_millis(1500)),
            vec![Identity::from("W1")]
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn test_silent_worker_purged_within_the_liveness_window() {
        use swarmq_common::time::{Clock, ManualClock};

        // Interval 500 ms, liveness 3: a silent worker survives to 1499 ms
        // and is gone by 2000 ms.
        let clock = ManualClock::new();
        let mut reg = WorkerRegistry::new(Duration::from_millis(1500));
        reg.register_or_refresh(&Identity::from("W1"), clock.now());

        clock.advance(Duration::from_millis(1499));
        assert!(reg.purge(clock.now()).is_empty());

        clock.advance(Duration::from_millis(501));
        assert_eq!(reg.purge(clock.now()), vec![Identity::from("W1")]);
    }

    #[test]
    fn test_no_duplicate_identities() {
        let mut reg = registry();
        let now = Instant::now();
        reg.register_or_refresh(&Identity::from("W1"), now);
        reg.register_or_refresh(&Identity::from("W1"), now);
        reg.register_or_refresh(&Identity::from("W1"), now + Duration::from_millis(10));
        assert_eq!(reg.available(), 1);
    }

    #[test]
    fn test_empty_pool_returns_none() {
        let mut reg = registry();
        assert_eq!(reg.next_available(), None);
        assert!(reg.purge(Instant::now()).is_empty());
    }
}
