use std::collections::VecDeque;

use rand::Rng;
use swarmq_common::heartbeat::HeartbeatSchedule;
use swarmq_common::time::{Clock, SystemClock};
use swarmq_common::transport::{Dealer, Router};
use swarmq_common::{Identity, Message, Result, WorkerSignal, HEARTBEAT};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::broker::BrokerConfig;
use crate::policy::{Route, RoutePolicy};
use crate::registry::WorkerRegistry;

/// A named peer broker and (when connected) our dealer into its cloud
/// frontend. A lost link leaves the entry in place with `dealer` unset;
/// redialing happens on the heartbeat cadence.
struct PeerLink {
    name: Identity,
    endpoint: String,
    dealer: Option<Dealer>,
}

/// A broker that participates in a mesh of named sites.
///
/// On top of the single-site behavior (see [`Broker`](crate::broker::Broker))
/// it binds a third, cloud-facing endpoint where peer brokers connect, and
/// consults a [`RoutePolicy`] for every client request: serve locally or
/// offload to a peer. Requests that arrive *from* a peer are always served
/// by local workers, so a request crosses the mesh at most once.
///
/// The return path rides the routing envelope: offloading pushes nothing
/// (the dealer's announced identity is this broker's name), the receiving
/// side pushes the origin site onto the envelope before dispatch, and
/// reply routing pops one address per hop.
pub struct FederatedBroker<C: Clock = SystemClock> {
    name: Identity,
    frontend: Router,
    backend: Router,
    cloud: Router,
    peers: Vec<PeerLink>,
    registry: WorkerRegistry,
    /// Requests that reached dispatch while the local pool was empty and no
    /// peer could take them. Flushed ahead of new traffic once a worker
    /// shows up; a request is never dropped for lack of capacity.
    parked: VecDeque<Message>,
    heartbeat: HeartbeatSchedule,
    policy: Box<dyn RoutePolicy>,
    config: BrokerConfig,
    clock: C,
}

impl FederatedBroker<SystemClock> {
    pub async fn bind(
        name: Identity,
        frontend: &str,
        backend: &str,
        cloud: &str,
        peers: Vec<(Identity, String)>,
        config: BrokerConfig,
        policy: Box<dyn RoutePolicy>,
    ) -> Result<Self> {
        Self::bind_with_clock(name, frontend, backend, cloud, peers, config, policy, SystemClock)
            .await
    }
}

impl<C: Clock> FederatedBroker<C> {
    #[allow(clippy::too_many_arguments)]
    pub async fn bind_with_clock(
        name: Identity,
        frontend: &str,
        backend: &str,
        cloud: &str,
        peers: Vec<(Identity, String)>,
        config: BrokerConfig,
        policy: Box<dyn RoutePolicy>,
        clock: C,
    ) -> Result<Self> {
        let frontend = Router::bind(frontend).await?;
        let backend = Router::bind(backend).await?;
        let cloud = Router::bind(cloud).await?;
        info!(
            broker = %name,
            frontend = %frontend.local_addr(),
            backend = %backend.local_addr(),
            cloud = %cloud.local_addr(),
            "federated broker listening"
        );
        let peers = peers
            .into_iter()
            .map(|(name, endpoint)| PeerLink {
                name,
                endpoint,
                dealer: None,
            })
            .collect();
        let registry = WorkerRegistry::new(config.liveness_window());
        let heartbeat = HeartbeatSchedule::new(config.heartbeat_interval, clock.now());
        Ok(Self {
            name,
            frontend,
            backend,
            cloud,
            peers,
            registry,
            parked: VecDeque::new(),
            heartbeat,
            policy,
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

    pub fn cloud_addr(&self) -> std::net::SocketAddr {
        self.cloud.local_addr()
    }

    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.connect_peers().await;
        while !*shutdown.borrow() {
            self.cycle().await?;
        }
        info!(broker = %self.name, "federated broker shutting down");
        Ok(())
    }

    async fn cycle(&mut self) -> Result<()> {
        if let Some((worker, message)) = self.backend.recv(self.config.tick).await? {
            self.handle_worker(worker, message).await?;
        }

        self.drain_peer_replies().await?;
        self.flush_parked().await?;
        self.drain_cloud_requests().await?;
        self.drain_client_requests().await?;

        let now = self.clock.now();
        if self.heartbeat.due(now) {
            for worker in self.registry.identities() {
                self.backend
                    .send(&worker, Message::single(HEARTBEAT))
                    .await?;
            }
            self.connect_peers().await;
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

    /// Replies to requests we offloaded come back on the peer dealers.
    /// A dead dealer is dropped here and redialed on the next heartbeat.
    async fn drain_peer_replies(&mut self) -> Result<()> {
        let mut routable = Vec::new();
        for peer in &mut self.peers {
            let Some(dealer) = peer.dealer.as_mut() else {
                continue;
            };
            loop {
                match dealer.try_recv() {
                    Ok(Some(reply)) => routable.push(reply),
                    Ok(None) => break,
                    Err(error) => {
                        warn!(peer = %peer.name, %error, "peer link lost");
                        peer.dealer = None;
                        break;
                    }
                }
            }
        }
        for reply in routable {
            self.route_reply(reply).await?;
        }
        Ok(())
    }

    /// Requests offloaded to us by peers. These are only ever served by
    /// local workers; the origin site is pushed onto the envelope so the
    /// reply finds its way back.
    async fn drain_cloud_requests(&mut self) -> Result<()> {
        while !self.registry.is_empty() {
            let Some((origin, mut request)) = self.cloud.try_recv() else {
                break;
            };
            debug!(peer = %origin, "serving offloaded request locally");
            request.push_address(origin.as_bytes());
            self.dispatch_local(request).await?;
        }
        Ok(())
    }

    async fn drain_client_requests(&mut self) -> Result<()> {
        loop {
            let capacity = self.registry.available();
            let live_peers = self.live_peer_names();
            if capacity == 0 && live_peers.is_empty() {
                break;
            }
            let Some((client, mut request)) = self.frontend.try_recv() else {
                break;
            };

            // The policy is only consulted when local workers could serve
            // the request; an empty pool goes straight to a peer.
            let route = if capacity == 0 {
                let pick = rand::thread_rng().gen_range(0..live_peers.len());
                Route::Peer(live_peers[pick].clone())
            } else {
                self.policy.choose_target(capacity, &live_peers)
            };
            let route = forbid_self_route(&self.name, request.address_stack(), route);

            request.push_delimiter();
            request.push_address(client.as_bytes());

            match route {
                Route::Local => self.dispatch_local(request).await?,
                Route::Peer(peer) => self.offload(peer, request).await?,
            }
        }
        Ok(())
    }

    async fn dispatch_local(&mut self, request: Message) -> Result<()> {
        let Some(worker) = self.registry.next_available() else {
            debug!("no worker for request, parking it");
            self.parked.push_back(request);
            return Ok(());
        };
        debug!(%worker, "dispatching request");
        self.backend.send(&worker, request).await
    }

    async fn flush_parked(&mut self) -> Result<()> {
        while !self.registry.is_empty() {
            let Some(request) = self.parked.pop_front() else {
                break;
            };
            self.dispatch_local(request).await?;
        }
        Ok(())
    }

    /// Sends an enveloped request to `peer`. The dealer announced our own
    /// broker name, so the far side knows where the reply belongs without
    /// us pushing anything onto the envelope. On a dead link, falls back
    /// to the local pool rather than losing the request.
    async fn offload(&mut self, peer: Identity, request: Message) -> Result<()> {
        if let Some(link) = self.peers.iter_mut().find(|p| p.name == peer) {
            if let Some(dealer) = link.dealer.as_mut() {
                match dealer.send(&request).await {
                    Ok(()) => {
                        debug!(peer = %peer, "offloaded request");
                        return Ok(());
                    }
                    Err(error) => {
                        warn!(peer = %peer, %error, "offload failed, serving locally");
                        link.dealer = None;
                    }
                }
            }
        }
        self.dispatch_local(request).await
    }

    /// Pops one hop off the envelope: a peer site goes back out the cloud
    /// endpoint, anything else is a local client. A site counts as a peer
    /// if it is in the configured table or currently connected to the
    /// cloud endpoint, so peering does not have to be symmetric for
    /// replies to find their way home.
    async fn route_reply(&mut self, mut reply: Message) -> Result<()> {
        let Some(address) = reply.pop_address() else {
            warn!(?reply, "reply without return address, dropping");
            return Ok(());
        };
        let hop = Identity::new(address);
        if self.peers.iter().any(|p| p.name == hop) || self.cloud.has_link(&hop).await {
            debug!(peer = %hop, "returning reply to origin site");
            self.cloud.send(&hop, reply).await
        } else {
            debug!(client = %hop, "routing reply");
            self.frontend.send(&hop, reply).await
        }
    }

    fn live_peer_names(&self) -> Vec<Identity> {
        self.peers
            .iter()
            .filter(|p| p.dealer.is_some())
            .map(|p| p.name.clone())
            .collect()
    }

    async fn connect_peers(&mut self) {
        for peer in &mut self.peers {
            if peer.dealer.is_some() {
                continue;
            }
            match Dealer::connect(&peer.endpoint, self.name.clone()).await {
                Ok(dealer) => {
                    info!(peer = %peer.name, endpoint = %peer.endpoint, "peer link up");
                    peer.dealer = Some(dealer);
                }
                Err(error) => {
                    debug!(peer = %peer.name, %error, "peer not reachable yet");
                }
            }
        }
    }
}

/// A request must never be offloaded to this broker itself, or to a site it
/// has already visited (its name appears in the routing envelope). Either
/// case collapses to local dispatch.
fn forbid_self_route(own: &Identity, address_stack: &[Vec<u8>], route: Route) -> Route {
    match route {
        Route::Peer(peer)
            if &peer == own
                || address_stack.iter().any(|a| a.as_slice() == peer.as_bytes()) =>
        {
            Route::Local
        }
        other => other,
    }
}
