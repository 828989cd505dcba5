use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A failure the worker acts out instead of serving the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Stop dead without replying; the request is lost mid-flight.
    Crash,
    /// Stall for a while before replying, as if the CPU were pegged.
    Overload,
}

/// Hook consulted once per request, before the reply is produced.
/// `completed` counts requests served so far on this worker.
pub trait FaultInjector: Send {
    fn before_reply(&mut self, completed: u64) -> Option<Fault>;
}

/// The production injector: never fails.
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn before_reply(&mut self, _completed: u64) -> Option<Fault> {
        None
    }
}

/// Random crashes and overloads after a warmup, for soak-testing broker
/// recovery by hand.
pub struct RandomFaults {
    warmup: u64,
    crash_one_in: u32,
    overload_one_in: u32,
    rng: StdRng,
}

impl RandomFaults {
    pub fn new() -> Self {
        Self {
            warmup: 3,
            crash_one_in: 5,
            overload_one_in: 3,
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for RandomFaults {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultInjector for RandomFaults {
    fn before_reply(&mut self, completed: u64) -> Option<Fault> {
        if completed <= self.warmup {
            return None;
        }
        if self.rng.gen_ratio(1, self.crash_one_in) {
            return Some(Fault::Crash);
        }
        if self.rng.gen_ratio(1, self.overload_one_in) {
            return Some(Fault::Overload);
        }
        None
    }
}

/// Plays back a fixed fault script, one entry per request. Used by tests
/// that need a worker to die at an exact point.
pub struct ScriptedFaults {
    script: VecDeque<Option<Fault>>,
}

impl ScriptedFaults {
    pub fn new(script: Vec<Option<Fault>>) -> Self {
        Self {
            script: VecDeque::from(script),
        }
    }
}

impl FaultInjector for ScriptedFaults {
    fn before_reply(&mut self, _completed: u64) -> Option<Fault> {
        self.script.pop_front().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_faults_is_quiet() {
        let mut faults = NoFaults;
        for n in 0..100 {
            assert_eq!(faults.before_reply(n), None);
        }
    }

    #[test]
    fn test_random_faults_respect_warmup() {
        let mut faults = RandomFaults {
            warmup: 3,
            crash_one_in: 2,
            overload_one_in: 2,
            rng: StdRng::seed_from_u64(1),
        };
        for n in 0..=3 {
            assert_eq!(faults.before_reply(n), None);
        }
    }

    #[test]
    fn test_random_faults_eventually_fire() {
        let mut faults = RandomFaults {
            warmup: 0,
            crash_one_in: 5,
            overload_one_in: 3,
            rng: StdRng::seed_from_u64(7),
        };
        let fired = (1..200).any(|n| faults.before_reply(n).is_some());
        assert!(fired);
    }

    #[test]
    fn test_scripted_faults_play_in_order() {
        let mut faults = ScriptedFaults::new(vec![None, Some(Fault::Crash)]);
        assert_eq!(faults.before_reply(1), None);
        assert_eq!(faults.before_reply(2), Some(Fault::Crash));
        // Past the end of the script, nothing fires.
        assert_eq!(faults.before_reply(3), None);
    }
}
