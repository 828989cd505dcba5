use std::time::{Duration, Instant};

use swarmq_common::heartbeat::{HeartbeatSchedule, HEARTBEAT_INTERVAL, HEARTBEAT_LIVENESS, POLL_TICK};
use swarmq_common::transport::Dealer;
use swarmq_common::{BrokerSignal, Identity, Message, Result, HEARTBEAT, READY};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::faults::{Fault, FaultInjector, NoFaults};
use crate::liveness::{Backoff, Liveness, BACKOFF_CEILING, BACKOFF_FLOOR};

/// Application logic plugged into a worker: payload frames in, reply
/// payload frames out.
pub trait RequestHandler: Send {
    fn handle(&mut self, payload: &[Vec<u8>]) -> Vec<Vec<u8>>;
}

/// Replies with the request payload unchanged.
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn handle(&mut self, payload: &[Vec<u8>]) -> Vec<Vec<u8>> {
        payload.to_vec()
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Broker backend endpoint to connect to.
    pub broker: String,
    pub identity: Identity,
    pub heartbeat_interval: Duration,
    pub liveness: u32,
    pub tick: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Simulated request processing time; zero in production handlers that
    /// do their own work.
    pub work_delay: Duration,
    /// How long an injected overload stalls before the reply goes out.
    pub overload_delay: Duration,
}

impl WorkerConfig {
    pub fn new(broker: impl Into<String>, identity: Identity) -> Self {
        Self {
            broker: broker.into(),
            identity,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            liveness: HEARTBEAT_LIVENESS,
            tick: POLL_TICK,
            initial_backoff: BACKOFF_FLOOR,
            max_backoff: BACKOFF_CEILING,
            work_delay: Duration::ZERO,
            overload_delay: Duration::from_secs(3),
        }
    }
}

/// Why one connection's serve loop ended.
enum ServeExit {
    /// Link considered dead; reconnect after the current backoff.
    Reconnect,
    /// Shutdown signal observed.
    Shutdown,
    /// An injected crash; the worker stops for good, mid-flight request lost.
    Crashed,
}

/// A requester-side worker: connects to a broker's backend, announces
/// `READY`, and serves one request at a time.
///
/// The connection is considered dead after `liveness` silent poll
/// intervals; the worker then rebuilds it after a doubling backoff. The
/// identity stays fixed across reconnects, so the broker's view of the
/// worker survives the link churn.
pub struct Worker<H: RequestHandler, F: FaultInjector = NoFaults> {
    config: WorkerConfig,
    handler: H,
    faults: F,
    completed: u64,
}

impl<H: RequestHandler> Worker<H, NoFaults> {
    pub fn new(config: WorkerConfig, handler: H) -> Self {
        Self::with_faults(config, handler, NoFaults)
    }
}

impl<H: RequestHandler, F: FaultInjector> Worker<H, F> {
    pub fn with_faults(config: WorkerConfig, handler: H, faults: F) -> Self {
        Self {
            config,
            handler,
            faults,
            completed: 0,
        }
    }

    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        info!(worker = %self.config.identity, broker = %self.config.broker, "worker starting");

        while !*shutdown.borrow() {
            match self.serve(&shutdown, &mut backoff).await? {
                ServeExit::Shutdown => break,
                ServeExit::Crashed => {
                    warn!(worker = %self.config.identity, "simulated crash, exiting");
                    return Ok(());
                }
                ServeExit::Reconnect => {
                    let delay = backoff.next_delay();
                    warn!(
                        worker = %self.config.identity,
                        delay_ms = delay.as_millis() as u64,
                        "broker unreachable, reconnecting after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        info!(worker = %self.config.identity, "worker shutting down");
        Ok(())
    }

    /// One connection's lifetime: connect, announce readiness, serve until
    /// the link dies or we are told to stop.
    async fn serve(
        &mut self,
        shutdown: &watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> Result<ServeExit> {
        let mut dealer =
            match Dealer::connect(&self.config.broker, self.config.identity.clone()).await {
                Ok(dealer) => dealer,
                Err(error) => {
                    debug!(%error, "connect failed");
                    return Ok(ServeExit::Reconnect);
                }
            };
        if dealer.send(&Message::single(READY)).await.is_err() {
            return Ok(ServeExit::Reconnect);
        }

        let mut liveness = Liveness::new(self.config.liveness);
        let mut heartbeat = HeartbeatSchedule::new(self.config.heartbeat_interval, Instant::now());

        loop {
            if *shutdown.borrow() {
                return Ok(ServeExit::Shutdown);
            }

            match dealer.recv(self.config.tick).await {
                Ok(Some(message)) => {
                    // Anything from the broker proves the link alive.
                    liveness.reset();
                    backoff.reset();
                    match BrokerSignal::from_message(message) {
                        BrokerSignal::Heartbeat => {}
                        BrokerSignal::Request(request) => {
                            match self.process(&mut dealer, request).await? {
                                None => {}
                                Some(exit) => return Ok(exit),
                            }
                        }
                        BrokerSignal::Malformed(message) => {
                            warn!(?message, "discarding malformed broker message");
                        }
                    }
                }
                Ok(None) => {
                    if liveness.record_miss() {
                        return Ok(ServeExit::Reconnect);
                    }
                }
                Err(error) => {
                    // Link errors count as silence; liveness decides when
                    // to give up on this connection.
                    debug!(%error, "link error");
                    if liveness.record_miss() {
                        return Ok(ServeExit::Reconnect);
                    }
                    tokio::time::sleep(self.config.tick).await;
                }
            }

            if heartbeat.due(Instant::now()) && dealer.send(&Message::single(HEARTBEAT)).await.is_err() {
                debug!("heartbeat send failed");
            }
        }
    }

    /// Serves one request, or acts out an injected fault instead.
    /// `Ok(Some(..))` ends the connection.
    async fn process(
        &mut self,
        dealer: &mut Dealer,
        request: Message,
    ) -> Result<Option<ServeExit>> {
        self.completed += 1;
        match self.faults.before_reply(self.completed) {
            Some(Fault::Crash) => return Ok(Some(ServeExit::Crashed)),
            Some(Fault::Overload) => {
                warn!(worker = %self.config.identity, "simulated overload");
                tokio::time::sleep(self.config.overload_delay).await;
            }
            None => {}
        }

        if !self.config.work_delay.is_zero() {
            tokio::time::sleep(self.config.work_delay).await;
        }

        let payload = self.handler.handle(request.payload());
        let Some(reply) = request.reply_with(payload) else {
            warn!(?request, "request without routing envelope, dropping");
            return Ok(None);
        };
        debug!(worker = %self.config.identity, served = self.completed, "sending reply");
        if dealer.send(&reply).await.is_err() {
            return Ok(Some(ServeExit::Reconnect));
        }
        Ok(None)
    }
}
