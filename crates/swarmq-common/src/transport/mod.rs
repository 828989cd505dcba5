//! TCP transport adapter: router/dealer endpoints over a multi-frame wire
//! codec.
//!
//! This is the interface boundary the broker core is written against. A
//! [`Router`] binds an endpoint and addresses connected peers by the
//! identity they announce in a one-message handshake; a [`Dealer`] connects
//! out and announces its identity. Message boundaries and frame boundaries
//! are preserved by a length-prefixed codec.

pub mod codec;
mod dealer;
mod router;

pub use dealer::Dealer;
pub use router::Router;
