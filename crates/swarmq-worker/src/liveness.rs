use std::time::Duration;

/// First reconnect delay after the broker goes quiet.
pub const BACKOFF_FLOOR: Duration = Duration::from_millis(1000);

/// Reconnect delay cap; doubling stops here.
pub const BACKOFF_CEILING: Duration = Duration::from_millis(32_000);

/// Missed-heartbeat budget for the link to the broker.
///
/// Any message from the broker refills the budget; each poll timeout spends
/// one. An exhausted budget means the broker is unreachable and the worker
/// should tear the connection down and reconnect.
#[derive(Debug)]
pub struct Liveness {
    ceiling: u32,
    remaining: u32,
}

impl Liveness {
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling,
            remaining: ceiling,
        }
    }

    /// The broker showed a sign of life.
    pub fn reset(&mut self) {
        self.remaining = self.ceiling;
    }

    /// One poll interval passed in silence. Returns true when the budget
    /// is exhausted.
    pub fn record_miss(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

/// Doubling reconnect delay: floor, 2x, 4x, ... capped at the ceiling.
/// Reset to the floor as soon as a rebuilt link proves alive.
#[derive(Debug)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// Delay to sleep before the next reconnect attempt. Each call doubles
    /// the following one, up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.ceiling.min(self.current * 2);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}
