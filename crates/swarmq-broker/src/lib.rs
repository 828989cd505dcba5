//! Request brokers: the single-site dispatcher and its federated variant.
//!
//! Both share the same core: a pool of ready workers tracked by the
//! [`WorkerRegistry`](registry::WorkerRegistry), heartbeats in both
//! directions, and least-recently-used dispatch. The
//! [`FederatedBroker`](federation::FederatedBroker) adds a cloud-facing
//! endpoint and a pluggable [`RoutePolicy`](policy::RoutePolicy) that can
//! offload requests to peer sites.

pub mod broker;
pub mod federation;
pub mod policy;
pub mod registry;

pub use broker::{Broker, BrokerConfig};
pub use federation::FederatedBroker;
pub use policy::{AlwaysLocal, ProbabilisticOffload, Route, RoutePolicy};
pub use registry::WorkerRegistry;
