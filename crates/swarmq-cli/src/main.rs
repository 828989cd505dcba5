//! # swarmq CLI Entry Point
//!
//! Main binary for the swarmq request broker mesh. Starts brokers (plain or
//! federated), workers, and a one-shot request client.
//!
//! ## Usage
//!
//! ```bash
//! # Start a single-site broker
//! swarmq broker -f 0.0.0.0:5555 -b 0.0.0.0:5556
//!
//! # Start a federated broker named DC1 peered with DC2
//! swarmq broker --name DC1 -f 0.0.0.0:5555 -b 0.0.0.0:5556 -c 0.0.0.0:5557 \
//!     --peer DC2=10.0.0.2:5557
//!
//! # Start an echo worker against the broker backend
//! swarmq worker -b 127.0.0.1:5556
//!
//! # Start a worker that randomly crashes and stalls (for soak testing)
//! swarmq worker -b 127.0.0.1:5556 --chaos
//!
//! # Send requests through the broker frontend
//! swarmq client -b 127.0.0.1:5555 "hello world"
//! ```

use anyhow::{anyhow, Context, Result};
use argh::FromArgs;
use swarmq_broker::{Broker, BrokerConfig, FederatedBroker, ProbabilisticOffload};
use swarmq_client::{Client, RetryConfig};
use swarmq_common::Identity;
use swarmq_worker::{EchoHandler, RandomFaults, Worker, WorkerConfig};
use tokio::sync::watch;

/// Parses a `NAME=HOST:PORT` peer declaration.
fn parse_peer(value: &str) -> Result<(Identity, String)> {
    let (name, endpoint) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("invalid peer '{}': expected NAME=HOST:PORT", value))?;
    if name.is_empty() || endpoint.is_empty() {
        return Err(anyhow!("invalid peer '{}': expected NAME=HOST:PORT", value));
    }
    Ok((Identity::from(name), endpoint.to_string()))
}

#[derive(FromArgs)]
/// swarmq - federated request broker mesh
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Broker(BrokerArgs),
    Worker(WorkerArgs),
    Client(ClientArgs),
}

/// Arguments for starting a broker.
///
/// Without `--peer` declarations this runs a single-site broker on the
/// frontend/backend pair. With peers it also binds the cloud endpoint and
/// offloads a fraction of client requests to the named sites.
#[derive(FromArgs)]
#[argh(subcommand, name = "broker")]
/// start a broker
struct BrokerArgs {
    /// site name announced to peer brokers
    #[argh(option, default = "\"broker\".into()")]
    name: String,

    /// address to bind the client-facing frontend to
    #[argh(option, short = 'f', default = "\"0.0.0.0:5555\".into()")]
    frontend: String,

    /// address to bind the worker-facing backend to
    #[argh(option, short = 'b', default = "\"0.0.0.0:5556\".into()")]
    backend: String,

    /// address to bind the peer-facing cloud endpoint to
    #[argh(option, short = 'c', default = "\"0.0.0.0:5557\".into()")]
    cloud: String,

    /// peer broker as NAME=HOST:PORT (repeatable, targets the peer's cloud endpoint)
    #[argh(option)]
    peer: Vec<String>,

    /// fraction of eligible requests offloaded to peers
    #[argh(option, default = "ProbabilisticOffload::DEFAULT_PROBABILITY")]
    offload: f64,
}

/// Arguments for starting an echo worker.
#[derive(FromArgs)]
#[argh(subcommand, name = "worker")]
/// start a worker
struct WorkerArgs {
    /// broker backend address to connect to
    #[argh(option, short = 'b', default = "\"127.0.0.1:5556\".into()")]
    broker: String,

    /// worker identity; generated when omitted
    #[argh(option, short = 'i')]
    identity: Option<String>,

    /// simulated processing time per request, in milliseconds
    #[argh(option, default = "0")]
    work_delay_ms: u64,

    /// randomly crash and stall after a warmup, for soak testing
    #[argh(switch)]
    chaos: bool,
}

/// Arguments for sending requests.
#[derive(FromArgs)]
#[argh(subcommand, name = "client")]
/// send a request and print the reply
struct ClientArgs {
    /// broker frontend address to connect to
    #[argh(option, short = 'b', default = "\"127.0.0.1:5555\".into()")]
    broker: String,

    /// send attempts before giving up
    #[argh(option, default = "3")]
    attempts: u32,

    /// per-attempt reply timeout, in milliseconds
    #[argh(option, default = "2500")]
    timeout_ms: u64,

    /// number of requests to send
    #[argh(option, short = 'n', default = "1")]
    count: u32,

    /// request payload
    #[argh(positional)]
    payload: String,
}

/// Flips to true on Ctrl-C; each long-running loop checks it per cycle.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            let _ = tx.send(true);
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Default log level INFO, overridable via RUST_LOG.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();

    match cli.command {
        Commands::Broker(args) => {
            let peers = args
                .peer
                .iter()
                .map(|p| parse_peer(p))
                .collect::<Result<Vec<_>>>()?;
            let config = BrokerConfig::default();
            let shutdown = shutdown_signal();

            if peers.is_empty() {
                let broker = Broker::bind(&args.frontend, &args.backend, config)
                    .await
                    .context("failed to start broker")?;
                broker.run(shutdown).await?;
            } else {
                let policy = Box::new(ProbabilisticOffload::new(args.offload));
                let broker = FederatedBroker::bind(
                    Identity::from(args.name),
                    &args.frontend,
                    &args.backend,
                    &args.cloud,
                    peers,
                    config,
                    policy,
                )
                .await
                .context("failed to start federated broker")?;
                broker.run(shutdown).await?;
            }
        }
        Commands::Worker(args) => {
            let identity = match args.identity {
                Some(name) => Identity::from(name),
                None => Identity::random("worker"),
            };
            let mut config = WorkerConfig::new(&args.broker, identity);
            config.work_delay = std::time::Duration::from_millis(args.work_delay_ms);
            let shutdown = shutdown_signal();

            if args.chaos {
                Worker::with_faults(config, EchoHandler, RandomFaults::new())
                    .run(shutdown)
                    .await?;
            } else {
                Worker::new(config, EchoHandler).run(shutdown).await?;
            }
        }
        Commands::Client(args) => {
            let client = Client::with_retry(
                &args.broker,
                RetryConfig {
                    attempts: args.attempts,
                    timeout: std::time::Duration::from_millis(args.timeout_ms),
                },
            );
            for n in 1..=args.count {
                let reply = client
                    .request_one(args.payload.as_bytes().to_vec())
                    .await
                    .with_context(|| format!("request {n} failed"))?;
                for frame in &reply {
                    println!("{}", String::from_utf8_lossy(frame));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer_accepts_name_and_endpoint() {
        let (name, endpoint) = parse_peer("DC2=10.0.0.2:5557").unwrap();
        assert_eq!(name, Identity::from("DC2"));
        assert_eq!(endpoint, "10.0.0.2:5557");
    }

    #[test]
    fn test_parse_peer_rejects_malformed_input() {
        assert!(parse_peer("DC2").is_err());
        assert!(parse_peer("=10.0.0.2:5557").is_err());
        assert!(parse_peer("DC2=").is_err());
    }
}
