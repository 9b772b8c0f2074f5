//! Reliability layer between decoded events and the event bus
//!
//! - **CircuitBreaker**: stop attempting while the bus is failing
//! - **FailedMessageStore**: bounded FIFO of events awaiting retry
//! - **Delivery**: breaker-guarded publish plus store-or-dead-letter escalation
//! - **RetryScheduler**: periodic backoff-driven republish sweep
//!
//! # Example
//!
//! ```ignore
//! use acct_gateway::resilience::*;
//!
//! let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
//! let store = Arc::new(FailedMessageStore::new(10_000));
//! let delivery = Arc::new(Delivery::new(publisher, dlq, breaker, store));
//!
//! let retry = RetryScheduler::new(Arc::clone(&delivery), RetryConfig::default()).spawn();
//! // ...
//! retry.shutdown().await;
//! ```

mod circuit_breaker;
mod delivery;
mod failed_store;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use delivery::{
    DEFAULT_PUBLISH_TIMEOUT, Delivery, HealthStatus, MetricsSnapshot, StoreOutcome,
};
pub use failed_store::{DEFAULT_CAPACITY, FailedMessage, FailedMessageStore};
pub use retry::{RetryConfig, RetryScheduler, RetrySchedulerHandle, SweepReport, backoff_delay};
