//! Retrying request client for a swarmq broker frontend.

pub mod client;

pub use client::{Client, RetryConfig};
