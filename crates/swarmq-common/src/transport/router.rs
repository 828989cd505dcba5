use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{self};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, SwarmqError};
use crate::message::{Identity, Message};
use crate::transport::codec;

type Links = Arc<Mutex<HashMap<Identity, mpsc::Sender<Message>>>>;

/// Server-style endpoint that addresses connected peers by identity.
///
/// Each accepted connection announces its identity in a one-message
/// handshake (a single frame holding the identity bytes). Inbound messages
/// from all peers funnel into one queue and are received as
/// `(identity, message)` pairs; outbound messages are routed by identity.
/// Sends to an unknown or disappeared identity are dropped silently, the
/// way a ZeroMQ ROUTER drops unroutable messages; liveness tracking, not
/// the transport, is responsible for noticing dead peers.
///
/// A reconnect announcing an already-known identity replaces the previous
/// link, which is what lets workers and clients rebuild their connection
/// without losing their address.
pub struct Router {
    local_addr: SocketAddr,
    inbound: mpsc::Receiver<(Identity, Message)>,
    links: Links,
    accept_task: JoinHandle<()>,
}

impl Router {
    pub async fn bind(endpoint: &str) -> Result<Self> {
        let listener = TcpListener::bind(endpoint)
            .await
            .map_err(|e| SwarmqError::Connection(format!("failed to bind {endpoint}: {e}")))?;
        let local_addr = listener.local_addr()?;

        let (inbound_tx, inbound_rx) = mpsc::channel(1024);
        let links: Links = Arc::new(Mutex::new(HashMap::new()));
        let accept_task = tokio::spawn(accept_loop(listener, inbound_tx, Arc::clone(&links)));

        Ok(Self {
            local_addr,
            inbound: inbound_rx,
            links,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits up to `timeout` for the next inbound message. `Ok(None)` on
    /// timeout; `Err(Terminated)` only when the endpoint itself is gone.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Option<(Identity, Message)>> {
        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(entry)) => Ok(Some(entry)),
            Ok(None) => Err(SwarmqError::Terminated),
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<(Identity, Message)> {
        self.inbound.try_recv().ok()
    }

    /// Whether a peer announcing `identity` is currently connected.
    pub async fn has_link(&self, identity: &Identity) -> bool {
        self.links.lock().await.contains_key(identity)
    }

    /// Routes `message` to the peer that announced `identity`, dropping it
    /// silently when no such link exists, its outbound queue is full, or the
    /// peer has gone away. Never blocks on a slow peer.
    pub async fn send(&self, identity: &Identity, message: Message) -> Result<()> {
        let link = {
            let table = self.links.lock().await;
            table.get(identity).cloned()
        };
        match link {
            Some(sender) => match sender.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(peer = %identity, "peer queue full, dropping message");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(peer = %identity, "link gone, dropping message");
                    let mut table = self.links.lock().await;
                    if table.get(identity).is_some_and(|s| s.same_channel(&sender)) {
                        table.remove(identity);
                    }
                }
            },
            None => debug!(peer = %identity, "no route for message, dropping"),
        }
        Ok(())
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, inbound: mpsc::Sender<(Identity, Message)>, links: Links) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(serve_connection(
                    stream,
                    peer,
                    inbound.clone(),
                    Arc::clone(&links),
                ));
            }
            Err(error) => {
                warn!(%error, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    inbound: mpsc::Sender<(Identity, Message)>,
    links: Links,
) {
    let _ = stream.set_nodelay(true);
    let (mut reader, writer) = stream.into_split();

    let hello = match codec::read_message(&mut reader).await {
        Ok(message) => message,
        Err(error) => {
            debug!(%peer, %error, "connection dropped before handshake");
            return;
        }
    };
    let identity = match hello.frame(0) {
        Some(frame) if hello.len() == 1 && !frame.is_empty() => Identity::new(frame),
        _ => {
            warn!(%peer, "invalid handshake, closing connection");
            return;
        }
    };

    let (outbound_tx, outbound_rx) = mpsc::channel::<Message>(64);
    {
        let mut table = links.lock().await;
        if table.insert(identity.clone(), outbound_tx.clone()).is_some() {
            debug!(peer = %identity, "identity reconnected, replacing link");
        }
    }

    let writer_task = tokio::spawn(write_loop(writer, outbound_rx));

    loop {
        match codec::read_message(&mut reader).await {
            Ok(message) => {
                if inbound.send((identity.clone(), message)).await.is_err() {
                    break;
                }
            }
            Err(SwarmqError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!(peer = %identity, "peer disconnected");
                break;
            }
            Err(error) => {
                debug!(peer = %identity, %error, "read failed, closing link");
                break;
            }
        }
    }

    // Only unregister if the table still points at *this* connection; a
    // reconnect may already have replaced it.
    let mut table = links.lock().await;
    if table
        .get(&identity)
        .is_some_and(|s| s.same_channel(&outbound_tx))
    {
        table.remove(&identity);
    }
    drop(table);
    writer_task.abort();
}

async fn write_loop(mut writer: OwnedWriteHalf, mut outbound: mpsc::Receiver<Message>) {
    while let Some(message) = outbound.recv().await {
        if let Err(error) = codec::write_message(&mut writer, &message).await {
            debug!(%error, "write failed, closing link");
            break;
        }
    }
}
