//! Shared building blocks for the swarmq broker mesh.
//!
//! This crate holds everything both sides of the wire agree on: the
//! multi-frame [`Message`] model with its routing envelope, the control
//! vocabulary (`READY` / `HEARTBEAT`), the error taxonomy, the heartbeat
//! schedule bookkeeping, and the TCP transport adapter (router and dealer
//! endpoints).

pub mod error;
pub mod heartbeat;
pub mod message;
pub mod time;
pub mod transport;

pub use error::{Result, SwarmqError};
pub use message::{BrokerSignal, Identity, Message, WorkerSignal, HEARTBEAT, READY};
