//! Downstream seams: the event bus publisher and the dead-letter sink
//!
//! The pipeline only sees these traits. Any `Err` from a publisher counts
//! as a failed attempt; the bus's own delivery guarantees are its concern.

pub mod stdout;
pub mod webhook;

use crate::error::PublishError;
use crate::event::AccountingEvent;
use async_trait::async_trait;

pub use stdout::{LogDeadLetterSink, StdoutPublisher};
pub use webhook::WebhookPublisher;

/// Publisher trait - sends accounting events to the event bus
///
/// # Example
///
/// ```ignore
/// struct KafkaPublisher {
///     producer: FutureProducer,
/// }
///
/// #[async_trait]
/// impl Publisher for KafkaPublisher {
///     fn name(&self) -> &'static str { "kafka" }
///
///     async fn publish(&self, event: &AccountingEvent, key: &str) -> Result<(), PublishError> {
///         self.producer.send(key, event).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publisher name for identification and logging
    fn name(&self) -> &'static str;

    /// Publish one event keyed by its partition key
    ///
    /// Ok(()) means the bus acknowledged the event.
    async fn publish(&self, event: &AccountingEvent, partition_key: &str)
    -> Result<(), PublishError>;

    /// Graceful shutdown
    ///
    /// Called once when the gateway stops, after the retry scheduler.
    async fn shutdown(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Terminal destination for events that cannot be delivered
///
/// Sends are best effort. A failed send is data loss; the caller logs it
/// and does not retry.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(
        &self,
        event: &AccountingEvent,
        partition_key: &str,
        reason: &str,
    ) -> Result<(), PublishError>;
}
