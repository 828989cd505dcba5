//! The worker side of the swarmq mesh: connect to a broker, announce
//! readiness, serve requests one at a time, and survive broker outages by
//! reconnecting with a doubling backoff.

pub mod faults;
pub mod liveness;
pub mod worker;

pub use faults::{Fault, FaultInjector, NoFaults, RandomFaults, ScriptedFaults};
pub use liveness::{Backoff, Liveness, BACKOFF_CEILING, BACKOFF_FLOOR};
pub use worker::{EchoHandler, RequestHandler, Worker, WorkerConfig};
