//! Content-addressed block client for the cairn dataset mirror.
//!
//! Three operations against an external block service: verified `get`
//! through the read gateway, verified `put` through the node write API,
//! and fire-and-forget `provide`. An optional remote pinning service is
//! mirrored behind its own rate limiter and a latching circuit breaker.

mod client;
mod pin;

pub use client::{BlockClient, Capabilities, IpfsConfig};
pub use pin::{CircuitBreaker, RemotePinner};
