use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use swarmq_common::Identity;

/// Where a client request should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Dispatch to a worker in the local pool.
    Local,
    /// Forward to the named peer broker.
    Peer(Identity),
}

/// Decides, per request, whether to serve locally or offload to a peer.
///
/// Callers only offer peers they currently hold a live link to, and only
/// consult the policy when the local pool could serve the request; with no
/// local capacity the request goes to a peer without asking.
pub trait RoutePolicy: Send {
    fn choose_target(&mut self, local_capacity: usize, peers: &[Identity]) -> Route;
}

/// Offloads a fixed fraction of requests to a uniformly chosen peer and
/// serves the rest locally.
pub struct ProbabilisticOffload {
    probability: f64,
    rng: StdRng,
}

impl ProbabilisticOffload {
    pub const DEFAULT_PROBABILITY: f64 = 0.25;

    pub fn new(probability: f64) -> Self {
        Self {
            probability,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests.
    #[doc(hidden)]
    pub fn seeded(probability: f64, seed: u64) -> Self {
        Self {
            probability,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for ProbabilisticOffload {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PROBABILITY)
    }
}

impl RoutePolicy for ProbabilisticOffload {
    fn choose_target(&mut self, local_capacity: usize, peers: &[Identity]) -> Route {
        if peers.is_empty() {
            return Route::Local;
        }
        if local_capacity == 0 || self.rng.gen_bool(self.probability) {
            let pick = self.rng.gen_range(0..peers.len());
            return Route::Peer(peers[pick].clone());
        }
        Route::Local
    }
}

/// Keeps every request local; used when a broker runs without peers.
pub struct AlwaysLocal;

impl RoutePolicy for AlwaysLocal {
    fn choose_target(&mut self, _local_capacity: usize, _peers: &[Identity]) -> Route {
        Route::Local
    }
}
