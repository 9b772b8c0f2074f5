//! Accounting gateway - RADIUS accounting to event bus
//!
//! Receives RADIUS Accounting-Requests over UDP, turns each into a usage
//! event and forwards it to an event bus. Bus outages are absorbed by a
//! circuit breaker, a bounded store of failed events, a periodic retry
//! sweep and a dead-letter sink.
//!
//! # Architecture
//!
//! ```text
//! UDP ──► codec ──► rate limiter ──► delivery ──► publisher (bus)
//!                                       │
//!                                       ├► failed store ◄─► retry scheduler
//!                                       └► dead-letter sink
//! ```
//!
//! Publishers and dead-letter sinks are pluggable via traits.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod accounting;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod metrics_server;
pub mod publish;
pub mod rate_limiter;
pub mod resilience;
pub mod server;

pub use config::Config;
pub use error::{GatewayError, Result};
