use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Result, SwarmqError};
use crate::message::{Identity, Message};
use crate::transport::codec;

/// Client-style endpoint with a stable announced identity.
///
/// The identity is sent as a one-frame handshake right after the TCP
/// connect, so the router on the other side can address replies to it.
/// When the link dies, `recv`/`try_recv` surface a `Connection` error once
/// the buffered messages are drained; callers rebuild the dealer to
/// reconnect, and the stable identity makes the new link equivalent to the
/// old one.
pub struct Dealer {
    identity: Identity,
    inbound: mpsc::Receiver<Message>,
    writer: OwnedWriteHalf,
    reader_task: JoinHandle<()>,
}

impl Dealer {
    pub async fn connect(endpoint: &str, identity: Identity) -> Result<Self> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| SwarmqError::Connection(format!("failed to connect to {endpoint}: {e}")))?;
        let _ = stream.set_nodelay(true);
        let (reader, mut writer) = stream.into_split();

        codec::write_message(&mut writer, &Message::single(identity.as_bytes())).await?;

        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let reader_task = tokio::spawn(read_loop(reader, inbound_tx));

        Ok(Self {
            identity,
            inbound: inbound_rx,
            writer,
            reader_task,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub async fn send(&mut self, message: &Message) -> Result<()> {
        codec::write_message(&mut self.writer, message).await
    }

    /// Waits up to `timeout` for the next message. `Ok(None)` on timeout,
    /// `Err(Connection)` once the link is gone.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Option<Message>> {
        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(SwarmqError::Connection("link closed".to_string())),
        }
    }

    /// Non-blocking receive. `Ok(None)` when nothing is pending,
    /// `Err(Connection)` once the link is gone.
    pub fn try_recv(&mut self) -> Result<Option<Message>> {
        match self.inbound.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(SwarmqError::Connection("link closed".to_string()))
            }
        }
    }
}

impl Drop for Dealer {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop(mut reader: OwnedReadHalf, inbound: mpsc::Sender<Message>) {
    loop {
        match codec::read_message(&mut reader).await {
            Ok(message) => {
                if inbound.send(message).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                debug!(%error, "dealer link closed");
                break;
            }
        }
    }
}
