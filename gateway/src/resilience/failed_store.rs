//! Bounded store for events awaiting republish
//!
//! In-memory only: anything still queued at process exit is lost. When the
//! store is full the caller escalates to the dead-letter sink instead.

use crate::event::AccountingEvent;
use chrono::Utc;
use parking_lot::Mutex;
use prometheus::Gauge;
use std::collections::VecDeque;
use tracing::{info, warn};

/// Default store capacity
pub const DEFAULT_CAPACITY: usize = 10_000;

/// A failed event with its retry bookkeeping
///
/// `failed_at` is fixed at creation. `retry_count` only grows, and only the
/// retry sweep increments it.
#[derive(Debug, Clone)]
pub struct FailedMessage {
    event: AccountingEvent,
    partition_key: String,
    failed_at_ms: i64,
    retry_count: u32,
}

impl FailedMessage {
    pub fn new(event: AccountingEvent, partition_key: impl Into<String>) -> Self {
        Self {
            event,
            partition_key: partition_key.into(),
            failed_at_ms: Utc::now().timestamp_millis(),
            retry_count: 0,
        }
    }

    /// Override the failure time (epoch millis)
    pub fn with_failed_at(mut self, failed_at_ms: i64) -> Self {
        self.failed_at_ms = failed_at_ms;
        self
    }

    pub fn event(&self) -> &AccountingEvent {
        &self.event
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    /// When the first publish attempt failed, epoch millis
    pub fn failed_at(&self) -> i64 {
        self.failed_at_ms
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub(crate) fn increment_retry_count(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    pub fn into_parts(self) -> (AccountingEvent, String) {
        (self.event, self.partition_key)
    }
}

/// Bounded FIFO of failed messages
///
/// The length check and the push happen under the same lock, so the store
/// never holds more than `capacity` messages. An attached size gauge is set
/// under that lock too, after every push, poll and clear.
pub struct FailedMessageStore {
    queue: Mutex<VecDeque<FailedMessage>>,
    capacity: usize,
    size_gauge: Option<Gauge>,
}

impl FailedMessageStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            size_gauge: None,
        }
    }

    /// Keep `gauge` equal to the number of queued messages
    pub fn with_size_gauge(mut self, gauge: Gauge) -> Self {
        gauge.set(self.len() as f64);
        self.size_gauge = Some(gauge);
        self
    }

    fn report_size(&self, size: usize) {
        if let Some(gauge) = &self.size_gauge {
            gauge.set(size as f64);
        }
    }

    /// Wrap an event as a fresh failed message and enqueue it
    ///
    /// Returns false without enqueuing when the store is full.
    pub fn offer(&self, event: AccountingEvent, partition_key: impl Into<String>) -> bool {
        let message = FailedMessage::new(event, partition_key);
        match self.push(message) {
            Ok(()) => true,
            Err(rejected) => {
                warn!(
                    capacity = self.capacity,
                    session_id = ?rejected.event.session_id,
                    "Failed message store is full, rejecting message"
                );
                false
            }
        }
    }

    /// Put a polled message back at the tail, keeping its bookkeeping
    ///
    /// Hands the message back if the store is full.
    pub fn requeue(&self, message: FailedMessage) -> Result<(), FailedMessage> {
        self.push(message)
    }

    /// Enqueue a prepared message, handing it back if the store is full
    pub fn push(&self, message: FailedMessage) -> Result<(), FailedMessage> {
        let size = {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                return Err(message);
            }
            queue.push_back(message);
            self.report_size(queue.len());
            queue.len()
        };

        if size % 100 == 0 {
            info!(size, "Failed message store size");
        }
        Ok(())
    }

    /// Dequeue the oldest message
    pub fn poll(&self) -> Option<FailedMessage> {
        let mut queue = self.queue.lock();
        let message = queue.pop_front();
        self.report_size(queue.len());
        message
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.lock().len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every queued message, returning how many were discarded
    pub fn clear(&self) -> usize {
        let cleared = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            self.report_size(0);
            n
        };
        info!(cleared, "Failed message store cleared");
        cleared
    }
}

impl Default for FailedMessageStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for FailedMessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailedMessageStore")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
