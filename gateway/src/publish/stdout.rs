//! Stdout publisher and log dead-letter sink for development
//!
//! Used when no bus or DLQ endpoint is configured.

use super::{DeadLetterSink, Publisher};
use crate::error::PublishError;
use crate::event::AccountingEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

/// Stdout publisher - prints events for debugging
pub struct StdoutPublisher {
    /// Multi-line human-readable output instead of JSON lines
    pretty: bool,
    /// Count of events published
    published_count: AtomicU64,
}

impl StdoutPublisher {
    /// One JSON object per line
    pub fn new() -> Self {
        Self {
            pretty: false,
            published_count: AtomicU64::new(0),
        }
    }

    pub fn pretty() -> Self {
        Self {
            pretty: true,
            published_count: AtomicU64::new(0),
        }
    }

    pub fn published_count(&self) -> u64 {
        self.published_count.load(Ordering::Relaxed)
    }
}

impl Default for StdoutPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for StdoutPublisher {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn publish(
        &self,
        event: &AccountingEvent,
        partition_key: &str,
    ) -> Result<(), PublishError> {
        use std::io::Write;

        let json = serde_json::to_string(event)
            .map_err(|e| PublishError::Serialization(e.to_string()))?;

        let mut stdout = std::io::stdout().lock();
        if self.pretty {
            writeln!(
                stdout,
                "┌─ {} ─────────────────────────────────────────",
                event.action_type
            )
            .ok();
            writeln!(stdout, "│ Event:     {}", event.event_id).ok();
            writeln!(stdout, "│ Key:       {partition_key}").ok();
            writeln!(stdout, "│ User:      {}", event.username.as_deref().unwrap_or("-")).ok();
            writeln!(
                stdout,
                "│ Usage:     in={} out={} time={}s",
                event.total_input_bytes(),
                event.total_output_bytes(),
                event.session_time
            )
            .ok();
            writeln!(stdout, "└─────────────────────────────────────────────────────").ok();
        } else {
            writeln!(stdout, "{partition_key} {json}").ok();
        }

        self.published_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Dead-letter sink that writes the event to the error log
#[derive(Debug, Default)]
pub struct LogDeadLetterSink {
    sent_count: AtomicU64,
}

impl LogDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DeadLetterSink for LogDeadLetterSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(
        &self,
        event: &AccountingEvent,
        partition_key: &str,
        reason: &str,
    ) -> Result<(), PublishError> {
        let json = serde_json::to_string(event)
            .map_err(|e| PublishError::Serialization(e.to_string()))?;

        error!(
            partition_key,
            reason,
            event = %json,
            "Dead-lettered accounting event"
        );
        self.sent_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::ActionType;

    fn make_event() -> AccountingEvent {
        AccountingEvent::builder(ActionType::InterimUpdate, "10.0.0.1")
            .session_id("S1")
            .build()
    }

    #[tokio::test]
    async fn test_publish_counts_events() {
        let publisher = StdoutPublisher::new();
        publisher.publish(&make_event(), "S1-10.0.0.1").await.unwrap();
        publisher.publish(&make_event(), "S1-10.0.0.1").await.unwrap();
        assert_eq!(publisher.published_count(), 2);
    }

    #[tokio::test]
    async fn test_pretty_publish() {
        let publisher = StdoutPublisher::pretty();
        publisher.publish(&make_event(), "k").await.unwrap();
        assert_eq!(publisher.published_count(), 1);
    }

    #[tokio::test]
    async fn test_log_sink_counts() {
        let sink = LogDeadLetterSink::new();
        sink.send(&make_event(), "k", "store full").await.unwrap();
        assert_eq!(sink.sent_count(), 1);
    }
}
