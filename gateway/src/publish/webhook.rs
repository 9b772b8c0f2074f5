//! HTTP webhook publisher
//!
//! POSTs each event as JSON to a bus ingestion endpoint. The partition key
//! travels in the `X-Partition-Key` header. The same type doubles as a
//! dead-letter sink pointed at a DLQ endpoint, adding the failure reason
//! and the original timestamp as headers.
//!
//! # Example
//!
//! ```ignore
//! let publisher: Arc<dyn Publisher> =
//!     Arc::new(WebhookPublisher::new("https://bus.example.com/accounting-events")?);
//! ```

use super::{DeadLetterSink, Publisher};
use crate::error::PublishError;
use crate::event::AccountingEvent;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use tracing::{debug, error, warn};

pub const PARTITION_KEY_HEADER: &str = "X-Partition-Key";
pub const ERROR_MESSAGE_HEADER: &str = "X-Error-Message";
pub const ORIGINAL_TIMESTAMP_HEADER: &str = "X-Original-Timestamp";

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default connection timeout in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP webhook publisher - POSTs events as JSON
pub struct WebhookPublisher {
    client: Client,
    url: String,
}

impl WebhookPublisher {
    /// Create a publisher for the given URL
    ///
    /// Uses default timeouts: 30s request timeout, 10s connection timeout.
    /// The pipeline's publish timeout usually fires first.
    ///
    /// # Errors
    /// Returns `PublishError::Init` if the HTTP client cannot be created
    pub fn new(url: impl Into<String>) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| PublishError::Init(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, event: &AccountingEvent, partition_key: &str) -> RequestBuilder {
        self.client
            .post(&self.url)
            .header(PARTITION_KEY_HEADER, partition_key)
            .json(event)
    }

    async fn send_request(
        &self,
        request: RequestBuilder,
        event: &AccountingEvent,
    ) -> Result<(), PublishError> {
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(
                    url = %self.url,
                    event_id = %event.event_id,
                    status = %response.status(),
                    "Webhook delivered"
                );
                Ok(())
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!(
                    url = %self.url,
                    event_id = %event.event_id,
                    status = %status,
                    body = %body,
                    "Webhook rejected event"
                );
                Err(PublishError::Rejected(format!("{status}: {body}")))
            }
            Err(e) if e.is_timeout() => {
                warn!(url = %self.url, event_id = %event.event_id, "Webhook request timed out");
                Err(PublishError::Timeout(DEFAULT_TIMEOUT_SECS * 1000))
            }
            Err(e) => {
                error!(url = %self.url, error = %e, "Webhook connection failed");
                Err(PublishError::Connection(format!(
                    "Failed to connect to {}: {e}",
                    self.url
                )))
            }
        }
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn publish(
        &self,
        event: &AccountingEvent,
        partition_key: &str,
    ) -> Result<(), PublishError> {
        let request = self.request(event, partition_key);
        self.send_request(request, event).await
    }
}

#[async_trait]
impl DeadLetterSink for WebhookPublisher {
    fn name(&self) -> &'static str {
        "webhook-dlq"
    }

    async fn send(
        &self,
        event: &AccountingEvent,
        partition_key: &str,
        reason: &str,
    ) -> Result<(), PublishError> {
        let request = self
            .request(event, partition_key)
            .header(ERROR_MESSAGE_HEADER, reason)
            .header(
                ORIGINAL_TIMESTAMP_HEADER,
                Utc::now().timestamp_millis().to_string(),
            );
        self.send_request(request, event).await
    }
}
