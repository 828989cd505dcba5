//! Federation Integration Tests
//!
//! Two-site meshes over loopback TCP: offload to a peer with spare
//! capacity, serve peer-originated work locally, and fall back to the
//! local pool when no peer is reachable.

use std::time::Duration;

use swarmq_broker::{AlwaysLocal, BrokerConfig, FederatedBroker, ProbabilisticOffload, RoutePolicy};
use swarmq_client::{Client, RetryConfig};
use swarmq_common::Identity;
use swarmq_worker::{EchoHandler, Worker, WorkerConfig};
use tokio::sync::watch;

// ============================================================================
// Helpers
// ============================================================================

fn fast_broker_config() -> BrokerConfig {
    BrokerConfig {
        heartbeat_interval: Duration::from_millis(100),
        liveness: 3,
        tick: Duration::from_millis(25),
    }
}

struct Site {
    frontend: String,
    backend: String,
    cloud: String,
    _shutdown: watch::Sender<bool>,
}

/// Binds a federated broker named `name` peered with `peers` and spawns
/// its loop.
async fn spawn_site(name: &str, offload: f64, peers: Vec<(Identity, String)>) -> Site {
    spawn_site_with_policy(name, Box::new(ProbabilisticOffload::new(offload)), peers).await
}

async fn spawn_site_with_policy(
    name: &str,
    policy: Box<dyn RoutePolicy>,
    peers: Vec<(Identity, String)>,
) -> Site {
    let broker = FederatedBroker::bind(
        Identity::from(name),
        "127.0.0.1:0",
        "127.0.0.1:0",
        "127.0.0.1:0",
        peers,
        fast_broker_config(),
        policy,
    )
    .await
    .expect("federated broker bind");

    let frontend = broker.frontend_addr().to_string();
    let backend = broker.backend_addr().to_string();
    let cloud = broker.cloud_addr().to_string();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(broker.run(shutdown_rx));
    Site {
        frontend,
        backend,
        cloud,
        _shutdown: shutdown_tx,
    }
}

fn spawn_worker(backend: &str, name: &str) -> watch::Sender<bool> {
    let mut config = WorkerConfig::new(backend, Identity::from(name));
    config.heartbeat_interval = Duration::from_millis(100);
    config.tick = Duration::from_millis(25);
    config.initial_backoff = Duration::from_millis(100);
    config.max_backoff = Duration::from_millis(400);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(Worker::new(config, EchoHandler).run(shutdown_rx));
    shutdown_tx
}

fn client(frontend: &str, attempts: u32, timeout_ms: u64) -> Client {
    Client::with_retry(
        frontend,
        RetryConfig {
            attempts,
            timeout: Duration::from_millis(timeout_ms),
        },
    )
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn request_offloaded_to_peer_with_capacity() {
    // DC2 has the only worker; DC1 has none and must offload.
    let dc2 = spawn_site("DC2", 0.0, Vec::new()).await;
    let dc1 = spawn_site(
        "DC1",
        1.0,
        vec![(Identity::from("DC2"), dc2.cloud.clone())],
    )
    .await;

    let _worker = spawn_worker(&dc2.backend, "dc2-worker");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let reply = client(&dc1.frontend, 3, 2000)
        .request_one(b"travels".to_vec())
        .await
        .expect("reply via peer site");
    assert_eq!(reply, vec![b"travels".to_vec()]);
}

#[tokio::test]
async fn peer_originated_request_is_never_reexported() {
    // DC1 offloads everything to DC2; DC2 would offload everything to DC3.
    // The only worker sits on DC2, and DC3 has none at all, so the request
    // is only answered if DC2 serves peer-originated work locally instead
    // of bouncing it onward.
    let dc3 = spawn_site("DC3", 0.0, Vec::new()).await;
    let dc2 = spawn_site(
        "DC2",
        1.0,
        vec![(Identity::from("DC3"), dc3.cloud.clone())],
    )
    .await;
    let dc1 = spawn_site(
        "DC1",
        1.0,
        vec![(Identity::from("DC2"), dc2.cloud.clone())],
    )
    .await;

    let _worker = spawn_worker(&dc2.backend, "dc2-worker");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let reply = client(&dc1.frontend, 3, 2000)
        .request_one(b"one-hop-only".to_vec())
        .await
        .expect("request served at the site it was offloaded to");
    assert_eq!(reply, vec![b"one-hop-only".to_vec()]);
}

#[tokio::test]
async fn unreachable_peer_falls_back_to_local_pool() {
    // The peer endpoint is dead, so despite a 100% offload policy every
    // request must be served by the local worker.
    let dc1 = spawn_site(
        "DC1",
        1.0,
        vec![(Identity::from("DC2"), "127.0.0.1:1".to_string())],
    )
    .await;

    let _worker = spawn_worker(&dc1.backend, "local-worker");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let reply = client(&dc1.frontend, 3, 2000)
        .request_one(b"stay-home".to_vec())
        .await
        .expect("local fallback");
    assert_eq!(reply, vec![b"stay-home".to_vec()]);
}

#[tokio::test]
async fn empty_pool_with_live_peer_offloads_instead_of_dropping() {
    // DC1 has no workers and a keep-it-local policy. With a live peer the
    // request must still go to DC2 rather than being dequeued and lost,
    // even though DC2's worker only shows up after the request is in
    // flight. A single-attempt client catches any drop as a timeout.
    let dc2 = spawn_site("DC2", 0.0, Vec::new()).await;
    let dc1 = spawn_site_with_policy(
        "DC1",
        Box::new(AlwaysLocal),
        vec![(Identity::from("DC2"), dc2.cloud.clone())],
    )
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let frontend = dc1.frontend.clone();
    let request = tokio::spawn(async move {
        client(&frontend, 1, 3000)
            .request_one(b"must-survive".to_vec())
            .await
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    let _worker = spawn_worker(&dc2.backend, "late-worker");

    let reply = request
        .await
        .expect("client task")
        .expect("request held until a worker appeared");
    assert_eq!(reply, vec![b"must-survive".to_vec()]);
}

#[tokio::test]
async fn reply_crosses_back_through_the_origin_site() {
    // Same topology as the offload test, but verify the client identity is
    // honored across two round trips (the envelope, not the connection,
    // carries the return path).
    let dc2 = spawn_site("DC2", 0.0, Vec::new()).await;
    let dc1 = spawn_site(
        "DC1",
        1.0,
        vec![(Identity::from("DC2"), dc2.cloud.clone())],
    )
    .await;

    let _worker = spawn_worker(&dc2.backend, "dc2-worker");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let requester = client(&dc1.frontend, 3, 2000);
    for n in 0..3u8 {
        let reply = requester
            .request_one(vec![n])
            .await
            .expect("federated round trip");
        assert_eq!(reply, vec![vec![n]]);
    }
}
