//! Circuit-breaker-guarded publish path
//!
//! `Delivery` wraps a [`Publisher`] the way a resilience decorator wraps an
//! emitter: check the breaker, attempt under a timeout, record the outcome.
//! It also owns the escalation ladder for failed events:
//!
//! ```text
//! publish ──fail──► FailedMessageStore ──full──► DeadLetterSink ──fail──► logged, lost
//! ```
//!
//! The orchestrator and the retry sweep share one `Delivery`, so both go
//! through the same breaker and update the same counters.

use super::circuit_breaker::{CircuitBreaker, CircuitState};
use super::failed_store::{FailedMessage, FailedMessageStore};
use crate::error::PublishError;
use crate::event::AccountingEvent;
use crate::metrics;
use crate::publish::{DeadLetterSink, Publisher};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default cap on a single publisher or dead-letter call
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(5000);

/// Where a failed event ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Queued for retry
    Stored,
    /// Store was full, handed to the dead-letter sink
    DeadLettered,
}

/// Read-only view of delivery counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_failures: u64,
    pub total_retries: u64,
    pub total_dlq_messages: u64,
    pub total_recovered: u64,
    pub queue_size: usize,
    pub consecutive_failures: u32,
    pub circuit_state: CircuitState,
}

/// Health derived from the circuit state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// `HEALTHY` when the circuit is closed, `DEGRADED` otherwise
    pub status: &'static str,
    pub circuit_state: CircuitState,
    pub queued_messages: usize,
    pub consecutive_failures: u32,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.circuit_state == CircuitState::Closed
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_failures: AtomicU64,
    total_retries: AtomicU64,
    total_dlq_messages: AtomicU64,
    total_recovered: AtomicU64,
}

/// Publish decorator plus store-or-dead-letter escalation
pub struct Delivery {
    publisher: Arc<dyn Publisher>,
    dead_letter: Arc<dyn DeadLetterSink>,
    breaker: Arc<CircuitBreaker>,
    store: Arc<FailedMessageStore>,
    publish_timeout: Duration,
    counters: Counters,
}

impl Delivery {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        dead_letter: Arc<dyn DeadLetterSink>,
        breaker: Arc<CircuitBreaker>,
        store: Arc<FailedMessageStore>,
    ) -> Self {
        Self {
            publisher,
            dead_letter,
            breaker,
            store,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            counters: Counters::default(),
        }
    }

    /// Cap each publisher and dead-letter call
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Publish guarded by the circuit breaker
    ///
    /// Returns `PublishError::CircuitOpen` without calling the publisher or
    /// recording anything when the circuit is open.
    pub async fn publish(
        &self,
        event: &AccountingEvent,
        partition_key: &str,
    ) -> Result<(), PublishError> {
        if self.breaker.is_open() {
            return Err(PublishError::CircuitOpen);
        }
        self.attempt(event, partition_key).await
    }

    /// One timed publisher call with its outcome recorded on the breaker
    ///
    /// Callers must have checked the breaker themselves.
    pub async fn attempt(
        &self,
        event: &AccountingEvent,
        partition_key: &str,
    ) -> Result<(), PublishError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.publish_timeout,
            self.publisher.publish(event, partition_key),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(self.publish_timeout.as_millis() as u64)),
        };
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(()) => {
                self.breaker.record_success();
                metrics::try_record_published(elapsed);
                Ok(())
            }
            Err(e) => {
                self.counters.total_failures.fetch_add(1, Ordering::Relaxed);
                self.breaker.record_failure();
                metrics::try_record_publish_failed(elapsed);
                debug!(
                    event_id = %event.event_id,
                    session_id = ?event.session_id,
                    publisher = self.publisher.name(),
                    error = %e,
                    "Publish attempt failed"
                );
                Err(e)
            }
        }
    }

    /// Queue a failed event for retry, or dead-letter it if the store is full
    pub async fn store_failed(
        &self,
        event: AccountingEvent,
        partition_key: String,
        reason: &str,
    ) -> StoreOutcome {
        match self.store.push(FailedMessage::new(event, partition_key)) {
            Ok(()) => {
                metrics::try_record_stored();
                debug!(reason, "Stored failed message for retry");
                StoreOutcome::Stored
            }
            Err(message) => {
                let (event, partition_key) = message.into_parts();
                error!(
                    session_id = ?event.session_id,
                    capacity = self.store.capacity(),
                    "Failed message store is full, sending to DLQ"
                );
                self.dead_letter(&event, &partition_key, reason).await;
                StoreOutcome::DeadLettered
            }
        }
    }

    /// Put a polled message back for a later sweep, keeping its bookkeeping
    pub async fn requeue(&self, message: FailedMessage) -> StoreOutcome {
        match self.store.requeue(message) {
            Ok(()) => StoreOutcome::Stored,
            Err(message) => {
                let (event, partition_key) = message.into_parts();
                self.dead_letter(&event, &partition_key, "Failed message store is full")
                    .await;
                StoreOutcome::DeadLettered
            }
        }
    }

    /// Send to the dead-letter sink; a failure here is data loss
    pub async fn dead_letter(&self, event: &AccountingEvent, partition_key: &str, reason: &str) {
        self.counters
            .total_dlq_messages
            .fetch_add(1, Ordering::Relaxed);
        metrics::try_record_dead_lettered();

        let result = match tokio::time::timeout(
            self.publish_timeout,
            self.dead_letter.send(event, partition_key, reason),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(self.publish_timeout.as_millis() as u64)),
        };

        match result {
            Ok(()) => warn!(
                event_id = %event.event_id,
                session_id = ?event.session_id,
                sink = self.dead_letter.name(),
                reason,
                "Message sent to DLQ"
            ),
            Err(e) => error!(
                event_id = %event.event_id,
                session_id = ?event.session_id,
                partition_key,
                sink = self.dead_letter.name(),
                reason,
                error = %e,
                "CRITICAL: failed to send message to DLQ, event lost"
            ),
        }
    }

    pub(crate) fn record_retry(&self) {
        self.counters.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovered(&self) {
        self.counters
            .total_recovered
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_failures: self.counters.total_failures.load(Ordering::Relaxed),
            total_retries: self.counters.total_retries.load(Ordering::Relaxed),
            total_dlq_messages: self.counters.total_dlq_messages.load(Ordering::Relaxed),
            total_recovered: self.counters.total_recovered.load(Ordering::Relaxed),
            queue_size: self.store.len(),
            consecutive_failures: self.breaker.consecutive_failures(),
            circuit_state: self.breaker.state(),
        }
    }

    pub fn health(&self) -> HealthStatus {
        let circuit_state = self.breaker.state();
        HealthStatus {
            status: if circuit_state == CircuitState::Closed {
                "HEALTHY"
            } else {
                "DEGRADED"
            },
            circuit_state,
            queued_messages: self.store.len(),
            consecutive_failures: self.breaker.consecutive_failures(),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn store(&self) -> &Arc<FailedMessageStore> {
        &self.store
    }

    pub fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }

    /// Shut the publisher down, reporting events that will not be retried
    pub async fn shutdown(&self) -> Result<(), PublishError> {
        let remaining = self.store.len();
        if remaining > 0 {
            warn!(
                remaining,
                "Shutting down with undelivered events in the failed message store"
            );
        }
        self.publisher.shutdown().await
    }
}
