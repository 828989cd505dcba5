//! Broker Dispatch Integration Tests
//!
//! End-to-end tests of the single-site broker with real workers and
//! clients over loopback TCP. Everything runs on shortened heartbeat
//! timings so the suite stays fast.

use std::time::Duration;

use swarmq_broker::{Broker, BrokerConfig};
use swarmq_client::{Client, RetryConfig};
use swarmq_common::Identity;
use swarmq_worker::{EchoHandler, Fault, ScriptedFaults, Worker, WorkerConfig};
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

fn fast_worker_config(backend: &str, name: &str) -> WorkerConfig {
    let mut config = WorkerConfig::new(backend, Identity::from(name));
    config.heartbeat_interval = Duration::from_millis(100);
    config.tick = Duration::from_millis(25);
    config.initial_backoff = Duration::from_millis(100);
    config.max_backoff = Duration::from_millis(400);
    config
}

/// Binds a broker, spawns its loop, and returns the endpoints plus the
/// shutdown handle keeping it alive.
async fn spawn_broker() -> (String, String, watch::Sender<bool>) {
    let broker = Broker::bind("127.0.0.1:0", "127.0.0.1:0", fast_broker_config())
        .await
        .expect("broker bind");
    let frontend = broker.frontend_addr().to_string();
    let backend = broker.backend_addr().to_string();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(broker.run(shutdown_rx));
    (frontend, backend, shutdown_tx)
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
async fn echo_round_trip() {
    let (frontend, backend, _shutdown) = spawn_broker().await;

    let (_worker_tx, worker_rx) = watch::channel(false);
    tokio::spawn(Worker::new(fast_worker_config(&backend, "W1"), EchoHandler).run(worker_rx));

    let reply = client(&frontend, 3, 2000)
        .request_one(b"hello".to_vec())
        .await
        .expect("echo reply");
    assert_eq!(reply, vec![b"hello".to_vec()]);
}

#[tokio::test]
async fn burst_larger_than_pool_is_queued_not_dropped() {
    let (frontend, backend, _shutdown) = spawn_broker().await;

    let mut config = fast_worker_config(&backend, "W1");
    config.work_delay = Duration::from_millis(50);
    let (_worker_tx, worker_rx) = watch::channel(false);
    tokio::spawn(Worker::new(config, EchoHandler).run(worker_rx));

    // Three concurrent requests against a pool of one.
    let mut handles = Vec::new();
    for n in 0..3u8 {
        let frontend = frontend.clone();
        handles.push(tokio::spawn(async move {
            client(&frontend, 3, 3000)
                .request_one(vec![b'r', b'0' + n])
                .await
        }));
    }
    for (n, handle) in handles.into_iter().enumerate() {
        let reply = handle.await.unwrap().expect("queued request served");
        assert_eq!(reply, vec![vec![b'r', b'0' + n as u8]]);
    }
}

#[tokio::test]
async fn crashed_worker_request_is_retried_on_another() {
    let (frontend, backend, _shutdown) = spawn_broker().await;

    // First worker dies on its first request without replying.
    let faulty = Worker::with_faults(
        fast_worker_config(&backend, "doomed"),
        EchoHandler,
        ScriptedFaults::new(vec![Some(Fault::Crash)]),
    );
    let (_faulty_tx, faulty_rx) = watch::channel(false);
    tokio::spawn(faulty.run(faulty_rx));

    // Let it register first so the LRU head points at it.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (_worker_tx, worker_rx) = watch::channel(false);
    tokio::spawn(Worker::new(fast_worker_config(&backend, "survivor"), EchoHandler).run(worker_rx));
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The first attempt is lost with the crash; the retry must land on the
    // surviving worker.
    let reply = client(&frontend, 3, 700)
        .request_one(b"important".to_vec())
        .await
        .expect("request survives a worker crash");
    assert_eq!(reply, vec![b"important".to_vec()]);
}

#[tokio::test]
async fn no_workers_means_client_timeout() {
    let (frontend, _backend, _shutdown) = spawn_broker().await;

    let outcome = client(&frontend, 2, 200)
        .request_one(b"anyone".to_vec())
        .await;
    assert!(outcome.is_err(), "request without workers must time out");
}

#[tokio::test]
async fn idle_worker_stays_pooled_through_heartbeats() {
    let (frontend, backend, _shutdown) = spawn_broker().await;

    let (_worker_tx, worker_rx) = watch::channel(false);
    tokio::spawn(Worker::new(fast_worker_config(&backend, "W1"), EchoHandler).run(worker_rx));

    // Idle well past the liveness window (3 x 100 ms); heartbeats must
    // keep the worker in the pool.
    tokio::time::sleep(Duration::from_millis(900)).await;

    let reply = client(&frontend, 1, 1000)
        .request_one(b"still-there".to_vec())
        .await
        .expect("idle worker still serves");
    assert_eq!(reply, vec![b"still-there".to_vec()]);
}
