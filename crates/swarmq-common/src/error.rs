use thiserror::Error;

/// Error taxonomy shared by every swarmq component.
///
/// Transient poll timeouts are deliberately *not* represented here: endpoint
/// `recv` calls return `Ok(None)` on timeout so that liveness bookkeeping
/// never has to route through the error path. Everything that does reach
/// this enum is either recoverable at the link level (`Connection`) or fatal
/// for the owning loop.
#[derive(Error, Debug)]
pub enum SwarmqError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("endpoint terminated")]
    Terminated,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SwarmqError>;
