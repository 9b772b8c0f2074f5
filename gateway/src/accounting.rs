//! Accounting orchestrator - one accounting packet in, an ack or silence out
//!
//! ```text
//! Received ─► Decoded ─► AdmissionChecked ─► Published ─────────────► Responded
//!    │           │                          ├► Stored / DeadLettered ─► Responded | Dropped
//!    └ malformed └ rate limited             └ publish failed ─► Stored / DeadLettered ─► Dropped
//! ```
//!
//! Silence is meaningful: the NAS retransmits an unacknowledged request, so
//! every drop is recoverable from the device side.

use crate::codec::{AttributeCodec, DecodeError, DecodedRequest};
use crate::error::PublishError;
use crate::metrics;
use crate::rate_limiter::{Admission, RateLimiter};
use crate::resilience::{Delivery, StoreOutcome};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{Instrument, debug, debug_span, warn};

/// Response policy for packets that arrive while the circuit is open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpenCircuitAck {
    /// Acknowledge; the event is already stored or dead-lettered
    #[default]
    Acknowledge,
    /// Stay silent so the NAS retransmits later
    Withhold,
}

impl std::str::FromStr for OpenCircuitAck {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "acknowledge" | "ack" => Ok(OpenCircuitAck::Acknowledge),
            "withhold" => Ok(OpenCircuitAck::Withhold),
            other => Err(format!("unknown open-circuit ack policy '{other}'")),
        }
    }
}

/// Why a packet got no response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Not a valid, authentic Accounting-Request with a status type
    Malformed(DecodeError),
    /// Over the admission limit
    RateLimited,
    /// Publish was attempted and failed; the event was stored or dead-lettered
    PublishFailed,
    /// Circuit open and [`OpenCircuitAck::Withhold`] in effect
    Withheld,
}

impl DropReason {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Malformed(_) => "malformed",
            DropReason::RateLimited => "rate_limited",
            DropReason::PublishFailed => "publish_failed",
            DropReason::Withheld => "withheld",
        }
    }
}

/// Result of handling one datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketOutcome {
    /// Encoded Accounting-Response to send back to the NAS
    Acknowledged(Bytes),
    /// Send nothing
    Dropped(DropReason),
}

impl PacketOutcome {
    pub fn response(&self) -> Option<&Bytes> {
        match self {
            PacketOutcome::Acknowledged(bytes) => Some(bytes),
            PacketOutcome::Dropped(_) => None,
        }
    }
}

/// Per-packet coordinator over codec, limiter and delivery
pub struct AccountingOrchestrator {
    codec: AttributeCodec,
    limiter: Arc<RateLimiter>,
    delivery: Arc<Delivery>,
    open_circuit_ack: OpenCircuitAck,
}

impl AccountingOrchestrator {
    pub fn new(codec: AttributeCodec, limiter: Arc<RateLimiter>, delivery: Arc<Delivery>) -> Self {
        Self {
            codec,
            limiter,
            delivery,
            open_circuit_ack: OpenCircuitAck::default(),
        }
    }

    pub fn with_open_circuit_ack(mut self, policy: OpenCircuitAck) -> Self {
        self.open_circuit_ack = policy;
        self
    }

    /// Handle one datagram received from `source`
    pub async fn handle_packet(&self, data: &[u8], source: SocketAddr) -> PacketOutcome {
        let decoded = match self.codec.decode(data, source.ip()) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(%source, error = %e, "Dropping undecodable accounting packet");
                return self.dropped(DropReason::Malformed(e));
            }
        };
        metrics::try_record_received(decoded.event.action_type.as_str());

        let span = debug_span!(
            "accounting",
            event_id = %decoded.event.event_id,
            action = %decoded.event.action_type,
            nas_ip = %decoded.event.nas_ip,
        );
        self.process(decoded).instrument(span).await
    }

    async fn process(&self, decoded: DecodedRequest) -> PacketOutcome {
        match self.limiter.check() {
            Admission::Admitted => {}
            Admission::Exceeded => {
                debug!(max_tps = self.limiter.max_tps(), "Rate limit exceeded, admitting");
            }
            Admission::Rejected => {
                debug!(max_tps = self.limiter.max_tps(), "Rate limit exceeded, dropping");
                return self.dropped(DropReason::RateLimited);
            }
        }

        let DecodedRequest { packet, event } = decoded;

        let session_id = event.session_id.clone();
        let partition_key = event.partition_key();

        match self.delivery.publish(&event, &partition_key).await {
            Ok(()) => {
                debug!(session_id = ?session_id, "Published accounting event");
            }
            Err(PublishError::CircuitOpen) => {
                let outcome = self
                    .delivery
                    .store_failed(event, partition_key, "Circuit breaker open")
                    .await;
                debug!(?outcome, "Circuit open, event not attempted");
                if self.open_circuit_ack == OpenCircuitAck::Withhold {
                    return self.dropped(DropReason::Withheld);
                }
            }
            Err(e) => {
                let outcome = self
                    .delivery
                    .store_failed(event, partition_key, &e.to_string())
                    .await;
                if outcome == StoreOutcome::DeadLettered {
                    warn!(session_id = ?session_id, error = %e, "Publish failed and store full");
                }
                return self.dropped(DropReason::PublishFailed);
            }
        }

        metrics::try_record_acknowledged();
        PacketOutcome::Acknowledged(self.codec.encode_ack(&packet, session_id.as_deref()))
    }

    fn dropped(&self, reason: DropReason) -> PacketOutcome {
        metrics::try_record_dropped(reason.as_str());
        PacketOutcome::Dropped(reason)
    }

    pub fn delivery(&self) -> &Arc<Delivery> {
        &self.delivery
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}
