//! Accounting event - the record forwarded to the event bus
//!
//! One `AccountingEvent` is built per decoded accounting packet and never
//! mutated afterwards. The orchestrator owns it until it is handed to a
//! publisher or to the failed-message store.
//!
//! # Bus format
//!
//! Events serialize to camelCase JSON:
//!
//! ```text
//! {"eventId":"01J...","sessionId":"S1","nasIP":"10.0.0.1","actionType":"STOP",
//!  "inputOctets":1000,"outputOctets":2000,"sessionTime":300, ...}
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Kind of accounting record (Acct-Status-Type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// Session started
    Start,
    /// Periodic usage update for a running session
    InterimUpdate,
    /// Session ended
    Stop,
}

impl ActionType {
    /// Label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Start => "START",
            ActionType::InterimUpdate => "INTERIM_UPDATE",
            ActionType::Stop => "STOP",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable usage record built from one accounting packet
///
/// Counters default to 0 when the attribute is absent on the wire.
///
/// # Example
///
/// ```
/// use acct_gateway::event::{AccountingEvent, ActionType};
///
/// let event = AccountingEvent::builder(ActionType::Start, "10.0.0.1")
///     .session_id("S1")
///     .username("alice")
///     .build();
///
/// assert_eq!(event.partition_key(), "S1-10.0.0.1");
/// assert_eq!(event.input_octets, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountingEvent {
    /// Correlation identifier (ULID), also used as the trace id in logs
    pub event_id: String,
    /// Acct-Session-Id
    pub session_id: Option<String>,
    /// NAS-IP-Address, or the datagram source when absent
    #[serde(rename = "nasIP")]
    pub nas_ip: String,
    /// User-Name
    pub username: Option<String>,
    pub action_type: ActionType,
    pub input_octets: u32,
    pub output_octets: u32,
    /// Acct-Session-Time in seconds
    pub session_time: u32,
    #[serde(rename = "inputGigaWords")]
    pub input_gigawords: u32,
    #[serde(rename = "outputGigaWords")]
    pub output_gigawords: u32,
    /// Event-Timestamp, or the decode time when absent
    pub timestamp: DateTime<Utc>,
    pub nas_port_id: Option<String>,
    pub nas_identifier: Option<String>,
    #[serde(rename = "framedIPAddress")]
    pub framed_ip_address: Option<String>,
    /// Acct-Delay-Time in seconds
    pub delay_time: u32,
}

impl AccountingEvent {
    /// Start building an event with a fresh event id
    pub fn builder(action_type: ActionType, nas_ip: impl Into<String>) -> AccountingEventBuilder {
        AccountingEventBuilder::new(action_type, nas_ip.into())
    }

    /// Key used by the bus for ordering and sharding: `sessionId-nasIP`
    pub fn partition_key(&self) -> String {
        format!(
            "{}-{}",
            self.session_id.as_deref().unwrap_or("unknown"),
            self.nas_ip
        )
    }

    /// Total input volume in octets, including gigaword wraps
    pub fn total_input_bytes(&self) -> u64 {
        (u64::from(self.input_gigawords) << 32) | u64::from(self.input_octets)
    }

    /// Total output volume in octets, including gigaword wraps
    pub fn total_output_bytes(&self) -> u64 {
        (u64::from(self.output_gigawords) << 32) | u64::from(self.output_octets)
    }
}

/// Builder for [`AccountingEvent`]
///
/// Only the decode step constructs events; once built they are frozen.
#[derive(Debug, Clone)]
pub struct AccountingEventBuilder {
    event: AccountingEvent,
}

impl AccountingEventBuilder {
    fn new(action_type: ActionType, nas_ip: String) -> Self {
        Self {
            event: AccountingEvent {
                event_id: ulid::Ulid::new().to_string(),
                session_id: None,
                nas_ip,
                username: None,
                action_type,
                input_octets: 0,
                output_octets: 0,
                session_time: 0,
                input_gigawords: 0,
                output_gigawords: 0,
                timestamp: Utc::now(),
                nas_port_id: None,
                nas_identifier: None,
                framed_ip_address: None,
                delay_time: 0,
            },
        }
    }

    pub fn event_id(mut self, id: impl Into<String>) -> Self {
        self.event.event_id = id.into();
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.event.session_id = Some(session_id.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.event.username = Some(username.into());
        self
    }

    /// Set usage counters (octets, session time, gigawords)
    pub fn usage(mut self, usage: Usage) -> Self {
        self.event.input_octets = usage.input_octets;
        self.event.output_octets = usage.output_octets;
        self.event.session_time = usage.session_time;
        self.event.input_gigawords = usage.input_gigawords;
        self.event.output_gigawords = usage.output_gigawords;
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.event.timestamp = timestamp;
        self
    }

    pub fn nas_port_id(mut self, nas_port_id: Option<String>) -> Self {
        self.event.nas_port_id = nas_port_id;
        self
    }

    pub fn nas_identifier(mut self, nas_identifier: Option<String>) -> Self {
        self.event.nas_identifier = nas_identifier;
        self
    }

    pub fn framed_ip_address(mut self, framed_ip: Option<String>) -> Self {
        self.event.framed_ip_address = framed_ip;
        self
    }

    pub fn delay_time(mut self, delay_time: u32) -> Self {
        self.event.delay_time = delay_time;
        self
    }

    pub fn build(self) -> AccountingEvent {
        self.event
    }
}

/// Usage counters carried by STOP and INTERIM_UPDATE records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_octets: u32,
    pub output_octets: u32,
    pub session_time: u32,
    pub input_gigawords: u32,
    pub output_gigawords: u32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_counters_to_zero() {
        let event = AccountingEvent::builder(ActionType::Start, "10.0.0.1").build();

        assert!(!event.event_id.is_empty());
        assert_eq!(event.action_type, ActionType::Start);
        assert_eq!(event.input_octets, 0);
        assert_eq!(event.output_octets, 0);
        assert_eq!(event.session_time, 0);
        assert_eq!(event.input_gigawords, 0);
        assert_eq!(event.output_gigawords, 0);
        assert!(event.framed_ip_address.is_none());
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = AccountingEvent::builder(ActionType::Stop, "10.0.0.1").build();
        let b = AccountingEvent::builder(ActionType::Stop, "10.0.0.1").build();
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn test_partition_key() {
        let event = AccountingEvent::builder(ActionType::Stop, "192.168.1.1")
            .session_id("abc")
            .build();
        assert_eq!(event.partition_key(), "abc-192.168.1.1");

        let no_session = AccountingEvent::builder(ActionType::Stop, "192.168.1.1").build();
        assert_eq!(no_session.partition_key(), "unknown-192.168.1.1");
    }

    #[test]
    fn test_total_bytes_include_gigawords() {
        let event = AccountingEvent::builder(ActionType::InterimUpdate, "10.0.0.1")
            .usage(Usage {
                input_octets: 10,
                input_gigawords: 2,
                output_octets: 5,
                ..Default::default()
            })
            .build();

        assert_eq!(event.total_input_bytes(), (2u64 << 32) + 10);
        assert_eq!(event.total_output_bytes(), 5);
    }

    #[test]
    fn test_bus_json_field_names() {
        let event = AccountingEvent::builder(ActionType::InterimUpdate, "10.0.0.1")
            .event_id("evt-1")
            .session_id("S1")
            .framed_ip_address(Some("100.64.0.7".into()))
            .build();

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventId"], "evt-1");
        assert_eq!(json["nasIP"], "10.0.0.1");
        assert_eq!(json["actionType"], "INTERIM_UPDATE");
        assert_eq!(json["framedIPAddress"], "100.64.0.7");
        assert_eq!(json["inputGigaWords"], 0);
        assert!(json["username"].is_null());
    }
}
