use std::time::Duration;

use swarmq_common::heartbeat::{HeartbeatSchedule, HEARTBEAT_INTERVAL, HEARTBEAT_LIVENESS, POLL_TICK};
use swarmq_common::time::{Clock, SystemClock};
use swarmq_common::transport::Router;
use swarmq_common::{Identity, Message, Result, WorkerSignal, HEARTBEAT};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::registry::WorkerRegistry;

/// Tuning for a broker's liveness tracking and poll cadence.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How often the broker heartbeats its pooled workers.
    pub heartbeat_interval: Duration,
    /// Heartbeats a worker may miss before it is purged.
    pub liveness: u32,
    /// Upper bound on one pass through the event loop.
    pub tick: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            liveness: HEARTBEAT_LIVENESS,
            tick: POLL_TICK,
        }
    }
}

impl BrokerConfig {
    pub fn liveness_window(&self) -> Duration {
        self.heartbeat_interval * self.liveness
    }
}

/// A single-site broker: clients on the frontend, workers on the backend,
/// requests dispatched to the longest-idle ready worker.
///
/// Workers announce themselves with `READY`, stay pooled by heartbeating,
/// and rejoin the pool each time they deliver a reply. Requests are held
/// in the frontend's inbound queue until a worker is available, so a
/// burst larger than the pool is absorbed rather than dropped.
pub struct Broker<C: Clock = SystemClock> {
    frontend: Router,
    backend: Router,
    registry: WorkerRegistry,
    heartbeat: HeartbeatSchedule,
    config: BrokerConfig,
    clock: C,
}

impl Broker<SystemClock> {
    pub async fn bind(frontend: &str, backend: &str, config: BrokerConfig) -> Result<Self> {
        Self::bind_with_clock(frontend, backend, config, SystemClock).await
    }
}

impl<C: Clock> Broker<C> {
    pub async fn bind_with_clock(
        frontend: &str,
        backend: &str,
        config: BrokerConfig,
        clock: C,
    ) -> Result<Self> {
        let frontend = Router::bind(frontend).await?;
        let backend = Router::bind(backend).await?;
        info!(
            frontend = %frontend.local_addr(),
            backend = %backend.local_addr(),
            "broker listening"
        );
        let registry = WorkerRegistry::new(config.liveness_window());
        let heartbeat = HeartbeatSchedule::new(config.heartbeat_interval, clock.now());
        Ok(Self {
            frontend,
            backend,
            registry,
            heartbeat,
            config,
            clock,
        })
    }

    pub fn frontend_addr(&self) -> std::net::SocketAddr {
        self.frontend.local_addr()
    }

    pub fn backend_addr(&self) -> std::net::SocketAddr {
        self.backend.local_addr()
    }

    /// Runs the event loop until `shutdown` flips to true.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<()> {
        while !*shutdown.borrow() {
            self.cycle().await?;
        }
        info!("broker shutting down");
        Ok(())
    }

    /// One pass: worker traffic, then pending requests, then heartbeats
    /// and the purge. Bounded by the configured tick so heartbeats keep
    /// their cadence even under a quiet backend.
    async fn cycle(&mut self) -> Result<()> {
        if let Some((worker, message)) = self.backend.recv(self.config.tick).await? {
            self.handle_worker(worker, message).await?;
        }

        // Requests wait in the frontend queue until a worker frees up.
        while !self.registry.is_empty() {
            let Some((client, request)) = self.frontend.try_recv() else {
                break;
            };
            self.dispatch(client, request).await?;
        }

        let now = self.clock.now();
        if self.heartbeat.due(now) {
            for worker in self.registry.identities() {
                self.backend
                    .send(&worker, Message::single(HEARTBEAT))
                    .await?;
            }
        }
        self.registry.purge(now);
        Ok(())
    }

    async fn handle_worker(&mut self, worker: Identity, message: Message) -> Result<()> {
        let now = self.clock.now();
        match WorkerSignal::from_message(message) {
            WorkerSignal::Ready => {
                info!(%worker, "worker ready");
                self.registry.register_or_refresh(&worker, now);
            }
            WorkerSignal::Heartbeat => {
                self.registry.register_or_refresh(&worker, now);
            }
            WorkerSignal::Reply(reply) => {
                self.registry.register_or_refresh(&worker, now);
                self.route_reply(reply).await?;
            }
            WorkerSignal::Malformed(message) => {
                warn!(%worker, ?message, "discarding malformed worker message");
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, client: Identity, mut request: Message) -> Result<()> {
        let Some(worker) = self.registry.next_available() else {
            // Callers only dispatch with a non-empty pool; requeueing is
            // not possible, so drop loudly if the invariant breaks.
            warn!(%client, "no worker for request, dropping");
            return Ok(());
        };
        debug!(%client, %worker, "dispatching request");
        request.push_delimiter();
        request.push_address(client.as_bytes());
        self.backend.send(&worker, request).await
    }

    async fn route_reply(&mut self, mut reply: Message) -> Result<()> {
        let Some(address) = reply.pop_address() else {
            warn!(?reply, "reply without return address, dropping");
            return Ok(());
        };
        let client = Identity::new(address);
        debug!(%client, "routing reply");
        self.frontend.send(&client, reply).await
    }
}
