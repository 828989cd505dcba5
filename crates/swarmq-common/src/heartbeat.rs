use std::time::{Duration, Instant};

/// How often both sides emit heartbeats when idle.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// How many heartbeat intervals a peer may stay silent before it is
/// considered dead.
pub const HEARTBEAT_LIVENESS: u32 = 3;

/// Poll timeout of the control loops. Bounds heartbeat emission latency.
pub const POLL_TICK: Duration = Duration::from_millis(250);

/// Deadline bookkeeping for periodic heartbeat emission.
///
/// Both the broker (towards its idle workers) and the worker (towards its
/// broker) drive one of these once per poll cycle: when the deadline has
/// passed, [`due`](Self::due) reports true exactly once and re-arms the
/// deadline one interval from *now*, so coarse scheduling jitter never
/// causes a burst of catch-up beats.
#[derive(Debug)]
pub struct HeartbeatSchedule {
    interval: Duration,
    next_at: Instant,
}

impl HeartbeatSchedule {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_at: now + interval,
        }
    }

    pub fn due(&mut self, now: Instant) -> bool {
        if now >= self.next_at {
            self.next_at = now + self.interval;
            true
        } else {
            false
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
