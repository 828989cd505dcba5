use std::time::Duration;

use swarmq_common::transport::Dealer;
use swarmq_common::{Identity, Message, Result, SwarmqError};
use tracing::{debug, warn};

/// Retry budget for one logical request.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total send attempts before giving up.
    pub attempts: u32,
    /// How long each attempt waits for a reply.
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_millis(2500),
        }
    }
}

/// A retrying request client.
///
/// Each attempt opens a fresh connection, sends the request, and waits up
/// to the configured timeout for a reply. Tearing the connection down
/// between attempts discards any late reply to an abandoned attempt, so a
/// retry can never be answered by a stale response. The identity stays
/// fixed, so the broker routes whichever reply does arrive correctly.
pub struct Client {
    endpoint: String,
    identity: Identity,
    retry: RetryConfig,
}

impl Client {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_retry(endpoint, RetryConfig::default())
    }

    pub fn with_retry(endpoint: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            identity: Identity::random("client"),
            retry,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Sends a multi-frame request and waits for the reply payload.
    /// Fails with [`SwarmqError::Timeout`] once the retry budget is spent.
    pub async fn request(&self, payload: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        for attempt in 1..=self.retry.attempts {
            match self.attempt(&payload).await {
                Ok(reply) => return Ok(reply),
                Err(error) => {
                    warn!(%error, attempt, of = self.retry.attempts, "request attempt failed");
                }
            }
        }
        Err(SwarmqError::Timeout(self.retry.timeout.as_millis() as u64))
    }

    /// Convenience wrapper for single-frame requests.
    pub async fn request_one(&self, payload: impl Into<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        self.request(vec![payload.into()]).await
    }

    async fn attempt(&self, payload: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        let mut dealer = Dealer::connect(&self.endpoint, self.identity.clone()).await?;
        dealer
            .send(&Message::from_frames(payload.to_vec()))
            .await?;
        debug!(client = %self.identity, "request sent, awaiting reply");
        match dealer.recv(self.retry.timeout).await? {
            Some(reply) => Ok(reply.frames().to_vec()),
            None => Err(SwarmqError::Timeout(self.retry.timeout.as_millis() as u64)),
        }
    }
}
