//! Attribute codec - RADIUS accounting packets to typed events
//!
//! Decoding is keyed by Acct-Status-Type:
//!
//! | Status | Action         | Fields read                                         |
//! |--------|----------------|-----------------------------------------------------|
//! | 1      | START          | session identifiers, framed IP                      |
//! | 2      | STOP           | usage counters, terminate cause (logged only)       |
//! | 3      | INTERIM_UPDATE | usage counters, framed IP, packet counts (logged)   |
//! | other  | START          | logged as anomalous                                 |
//!
//! A packet without Acct-Status-Type produces no event. The caller drops it
//! and sends nothing, so the NAS retransmits.

pub mod attributes;
pub mod packet;

use crate::event::{AccountingEvent, ActionType, Usage};
use attributes::{AcctStatusType, TerminateCause, kind};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use packet::{Attribute, Code, RadiusPacket};
use std::net::IpAddr;
use thiserror::Error;
use tracing::{debug, warn};

/// Reply-Message carried by every acknowledgement
pub const ACK_REPLY_MESSAGE: &str = "ACKNOWLEDGED";

/// Reasons a datagram cannot be turned into an event
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram too short: {0} octets")]
    TooShort(usize),

    #[error("invalid packet length: declared {declared}, received {actual}")]
    InvalidLength { declared: usize, actual: usize },

    #[error("malformed attribute at offset {offset}")]
    MalformedAttribute { offset: usize },

    #[error("invalid value for attribute {kind}: {len} octets")]
    InvalidAttributeValue { kind: u8, len: usize },

    #[error("not an Accounting-Request (code {0})")]
    UnexpectedCode(u8),

    #[error("request authenticator does not match shared secret")]
    BadAuthenticator,

    #[error("missing Acct-Status-Type attribute")]
    MissingStatusType,
}

/// A decoded accounting request
///
/// Keeps the parsed packet so the acknowledgement can echo its identifier
/// and be signed against its authenticator.
#[derive(Debug, Clone)]
pub struct DecodedRequest {
    pub packet: RadiusPacket,
    pub event: AccountingEvent,
}

/// Decodes accounting requests and encodes acknowledgements
#[derive(Clone)]
pub struct AttributeCodec {
    secret: Bytes,
}

impl AttributeCodec {
    /// Create a codec for the given shared secret
    pub fn new(secret: impl Into<Bytes>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Decode a datagram received from `client` into an accounting event
    pub fn decode(&self, data: &[u8], client: IpAddr) -> Result<DecodedRequest, DecodeError> {
        let packet = RadiusPacket::parse(data)?;

        if Code::from_u8(packet.code) != Some(Code::AccountingRequest) {
            return Err(DecodeError::UnexpectedCode(packet.code));
        }
        if !packet.verify_request_authenticator(&self.secret) {
            return Err(DecodeError::BadAuthenticator);
        }

        let status = packet
            .attribute(kind::ACCT_STATUS_TYPE)
            .ok_or(DecodeError::MissingStatusType)?
            .as_u32()?;

        let event = build_event(&packet, status, client)?;
        Ok(DecodedRequest { packet, event })
    }

    /// Encode the acknowledgement for a decoded request
    ///
    /// The session id is echoed when present; without one the response
    /// carries no attributes at all.
    pub fn encode_ack(&self, request: &RadiusPacket, session_id: Option<&str>) -> Bytes {
        let attributes = match session_id {
            Some(id) => vec![
                Attribute::text(kind::REPLY_MESSAGE, ACK_REPLY_MESSAGE),
                Attribute::text(kind::ACCT_SESSION_ID, id),
            ],
            None => Vec::new(),
        };

        RadiusPacket::accounting_response(request, attributes)
            .encode_response(&request.authenticator, &self.secret)
    }
}

impl std::fmt::Debug for AttributeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeCodec").finish_non_exhaustive()
    }
}

fn action_for_status(status: u32) -> ActionType {
    match AcctStatusType::from_u32(status) {
        Some(AcctStatusType::Start) => ActionType::Start,
        Some(AcctStatusType::Stop) => ActionType::Stop,
        Some(AcctStatusType::InterimUpdate) => ActionType::InterimUpdate,
        None => {
            warn!(status, "unknown Acct-Status-Type, treating as START");
            ActionType::Start
        }
    }
}

fn build_event(
    packet: &RadiusPacket,
    status: u32,
    client: IpAddr,
) -> Result<AccountingEvent, DecodeError> {
    let action = action_for_status(status);

    let nas_ip = match packet.attribute(kind::NAS_IP_ADDRESS) {
        Some(attr) => attr.as_ipv4()?.to_string(),
        None => client.to_string(),
    };

    let timestamp = match packet.attribute(kind::EVENT_TIMESTAMP) {
        Some(attr) => DateTime::<Utc>::from_timestamp(i64::from(attr.as_u32()?), 0)
            .unwrap_or_else(Utc::now),
        None => Utc::now(),
    };

    let mut builder = AccountingEvent::builder(action, nas_ip)
        .timestamp(timestamp)
        .nas_port_id(text(packet, kind::NAS_PORT_ID))
        .nas_identifier(text(packet, kind::NAS_IDENTIFIER))
        .delay_time(integer(packet, kind::ACCT_DELAY_TIME)?);

    if let Some(session_id) = text(packet, kind::ACCT_SESSION_ID) {
        builder = builder.session_id(session_id);
    }
    if let Some(username) = text(packet, kind::USER_NAME) {
        builder = builder.username(username);
    }

    let event = match action {
        ActionType::Start => builder.framed_ip_address(framed_ip(packet)?).build(),
        ActionType::InterimUpdate => builder
            .framed_ip_address(framed_ip(packet)?)
            .usage(usage(packet)?)
            .build(),
        ActionType::Stop => builder.usage(usage(packet)?).build(),
    };

    log_decoded(packet, &event);
    Ok(event)
}

/// Logged-only attributes never fail the decode
fn log_decoded(packet: &RadiusPacket, event: &AccountingEvent) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }

    match event.action_type {
        ActionType::Start => debug!(
            event_id = %event.event_id,
            user = ?event.username,
            session_id = ?event.session_id,
            framed_ip = ?event.framed_ip_address,
            "START"
        ),
        ActionType::InterimUpdate => debug!(
            event_id = %event.event_id,
            user = ?event.username,
            session_id = ?event.session_id,
            session_time = event.session_time,
            input_octets = event.input_octets,
            input_packets = integer(packet, kind::ACCT_INPUT_PACKETS).unwrap_or_default(),
            output_octets = event.output_octets,
            output_packets = integer(packet, kind::ACCT_OUTPUT_PACKETS).unwrap_or_default(),
            "INTERIM_UPDATE"
        ),
        ActionType::Stop => {
            let cause = packet
                .attribute(kind::ACCT_TERMINATE_CAUSE)
                .and_then(|attr| attr.as_u32().ok())
                .map_or_else(|| "Unknown".to_string(), TerminateCause::describe);
            debug!(
                event_id = %event.event_id,
                user = ?event.username,
                session_id = ?event.session_id,
                session_time = event.session_time,
                input_octets = event.input_octets,
                output_octets = event.output_octets,
                terminate_cause = %cause,
                "STOP"
            )
        }
    }
}

fn usage(packet: &RadiusPacket) -> Result<Usage, DecodeError> {
    Ok(Usage {
        input_octets: integer(packet, kind::ACCT_INPUT_OCTETS)?,
        output_octets: integer(packet, kind::ACCT_OUTPUT_OCTETS)?,
        session_time: integer(packet, kind::ACCT_SESSION_TIME)?,
        input_gigawords: integer(packet, kind::ACCT_INPUT_GIGAWORDS)?,
        output_gigawords: integer(packet, kind::ACCT_OUTPUT_GIGAWORDS)?,
    })
}

fn framed_ip(packet: &RadiusPacket) -> Result<Option<String>, DecodeError> {
    packet
        .attribute(kind::FRAMED_IP_ADDRESS)
        .map(|attr| attr.as_ipv4().map(|ip| ip.to_string()))
        .transpose()
}

fn text(packet: &RadiusPacket, kind: u8) -> Option<String> {
    packet.attribute(kind).map(Attribute::as_text)
}

/// Integer attribute, 0 when absent
fn integer(packet: &RadiusPacket, kind: u8) -> Result<u32, DecodeError> {
    packet
        .attribute(kind)
        .map(Attribute::as_u32)
        .transpose()
        .map(Option::unwrap_or_default)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const SECRET: &[u8] = b"sharedsecret";

    fn client() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10))
    }

    fn request(attributes: Vec<Attribute>) -> Bytes {
        RadiusPacket::accounting_request(7, attributes).encode_request(SECRET)
    }

    fn codec() -> AttributeCodec {
        AttributeCodec::new(SECRET)
    }

    #[test]
    fn test_start_has_zero_usage() {
        let wire = request(vec![
            Attribute::integer(kind::ACCT_STATUS_TYPE, 1),
            Attribute::text(kind::ACCT_SESSION_ID, "S1"),
            Attribute::text(kind::USER_NAME, "alice"),
            Attribute::ipv4(kind::FRAMED_IP_ADDRESS, Ipv4Addr::new(100, 64, 0, 9)),
        ]);

        let event = codec().decode(&wire, client()).unwrap().event;

        assert_eq!(event.action_type, ActionType::Start);
        assert_eq!(event.session_id.as_deref(), Some("S1"));
        assert_eq!(event.username.as_deref(), Some("alice"));
        assert_eq!(event.framed_ip_address.as_deref(), Some("100.64.0.9"));
        assert_eq!(event.input_octets, 0);
        assert_eq!(event.output_octets, 0);
        assert_eq!(event.session_time, 0);
        assert_eq!(event.input_gigawords, 0);
        assert_eq!(event.output_gigawords, 0);
    }

    #[test]
    fn test_start_ignores_usage_attributes() {
        let wire = request(vec![
            Attribute::integer(kind::ACCT_STATUS_TYPE, 1),
            Attribute::text(kind::ACCT_SESSION_ID, "S1"),
            Attribute::integer(kind::ACCT_INPUT_OCTETS, 555),
        ]);

        let event = codec().decode(&wire, client()).unwrap().event;
        assert_eq!(event.input_octets, 0);
    }

    #[test]
    fn test_stop_reads_usage_and_drops_framed_ip() {
        let wire = request(vec![
            Attribute::integer(kind::ACCT_STATUS_TYPE, 2),
            Attribute::text(kind::ACCT_SESSION_ID, "S2"),
            Attribute::integer(kind::ACCT_INPUT_OCTETS, 1000),
            Attribute::integer(kind::ACCT_OUTPUT_OCTETS, 2000),
            Attribute::integer(kind::ACCT_SESSION_TIME, 300),
            Attribute::integer(kind::ACCT_TERMINATE_CAUSE, 1),
            Attribute::ipv4(kind::FRAMED_IP_ADDRESS, Ipv4Addr::new(100, 64, 0, 9)),
        ]);

        let event = codec().decode(&wire, client()).unwrap().event;

        assert_eq!(event.action_type, ActionType::Stop);
        assert_eq!(event.input_octets, 1000);
        assert_eq!(event.output_octets, 2000);
        assert_eq!(event.session_time, 300);
        assert!(event.framed_ip_address.is_none());
    }

    #[test]
    fn test_interim_update_reads_usage_and_gigawords() {
        let wire = request(vec![
            Attribute::integer(kind::ACCT_STATUS_TYPE, 3),
            Attribute::text(kind::ACCT_SESSION_ID, "S3"),
            Attribute::integer(kind::ACCT_INPUT_OCTETS, 10),
            Attribute::integer(kind::ACCT_INPUT_GIGAWORDS, 1),
            Attribute::integer(kind::ACCT_OUTPUT_GIGAWORDS, 2),
            Attribute::integer(kind::ACCT_INPUT_PACKETS, 7),
            Attribute::ipv4(kind::FRAMED_IP_ADDRESS, Ipv4Addr::new(100, 64, 0, 9)),
        ]);

        let event = codec().decode(&wire, client()).unwrap().event;

        assert_eq!(event.action_type, ActionType::InterimUpdate);
        assert_eq!(event.input_octets, 10);
        assert_eq!(event.input_gigawords, 1);
        assert_eq!(event.output_gigawords, 2);
        assert_eq!(event.framed_ip_address.as_deref(), Some("100.64.0.9"));
    }

    #[test]
    fn test_unknown_status_falls_back_to_start() {
        let wire = request(vec![
            Attribute::integer(kind::ACCT_STATUS_TYPE, 7),
            Attribute::text(kind::ACCT_SESSION_ID, "S4"),
        ]);

        let event = codec().decode(&wire, client()).unwrap().event;
        assert_eq!(event.action_type, ActionType::Start);
    }

    #[test]
    fn test_missing_status_type_fails() {
        let wire = request(vec![Attribute::text(kind::ACCT_SESSION_ID, "S5")]);
        assert!(matches!(
            codec().decode(&wire, client()),
            Err(DecodeError::MissingStatusType)
        ));
    }

    #[test]
    fn test_missing_session_id_still_builds_event() {
        let wire = request(vec![Attribute::integer(kind::ACCT_STATUS_TYPE, 1)]);
        let event = codec().decode(&wire, client()).unwrap().event;
        assert!(event.session_id.is_none());
    }

    #[test]
    fn test_nas_ip_falls_back_to_client_address() {
        let wire = request(vec![Attribute::integer(kind::ACCT_STATUS_TYPE, 1)]);
        let event = codec().decode(&wire, client()).unwrap().event;
        assert_eq!(event.nas_ip, "192.0.2.10");

        let wire = request(vec![
            Attribute::integer(kind::ACCT_STATUS_TYPE, 1),
            Attribute::ipv4(kind::NAS_IP_ADDRESS, Ipv4Addr::new(10, 1, 1, 1)),
        ]);
        let event = codec().decode(&wire, client()).unwrap().event;
        assert_eq!(event.nas_ip, "10.1.1.1");
    }

    #[test]
    fn test_common_attributes() {
        let wire = request(vec![
            Attribute::integer(kind::ACCT_STATUS_TYPE, 2),
            Attribute::text(kind::NAS_PORT_ID, "eth0/1"),
            Attribute::text(kind::NAS_IDENTIFIER, "bng-01"),
            Attribute::integer(kind::ACCT_DELAY_TIME, 4),
            Attribute::integer(kind::EVENT_TIMESTAMP, 1_700_000_000),
        ]);

        let event = codec().decode(&wire, client()).unwrap().event;
        assert_eq!(event.nas_port_id.as_deref(), Some("eth0/1"));
        assert_eq!(event.nas_identifier.as_deref(), Some("bng-01"));
        assert_eq!(event.delay_time, 4);
        assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_wrong_code_is_rejected() {
        let mut packet = RadiusPacket::accounting_request(
            1,
            vec![Attribute::integer(kind::ACCT_STATUS_TYPE, 1)],
        );
        packet.code = 1; // Access-Request
        let wire = packet.encode_request(SECRET);

        assert!(matches!(
            codec().decode(&wire, client()),
            Err(DecodeError::UnexpectedCode(1))
        ));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let wire = RadiusPacket::accounting_request(
            1,
            vec![Attribute::integer(kind::ACCT_STATUS_TYPE, 1)],
        )
        .encode_request(b"other");

        assert!(matches!(
            codec().decode(&wire, client()),
            Err(DecodeError::BadAuthenticator)
        ));
    }

    #[test]
    fn test_malformed_counter_is_rejected() {
        let wire = request(vec![
            Attribute::integer(kind::ACCT_STATUS_TYPE, 2),
            Attribute::new(kind::ACCT_INPUT_OCTETS, vec![1u8, 2, 3]),
        ]);
        assert!(matches!(
            codec().decode(&wire, client()),
            Err(DecodeError::InvalidAttributeValue { .. })
        ));
    }

    #[test]
    fn test_ack_echoes_session_id() {
        let codec = codec();
        let wire = request(vec![
            Attribute::integer(kind::ACCT_STATUS_TYPE, 1),
            Attribute::text(kind::ACCT_SESSION_ID, "S1"),
        ]);
        let decoded = codec.decode(&wire, client()).unwrap();

        let ack = codec.encode_ack(&decoded.packet, decoded.event.session_id.as_deref());
        let response = RadiusPacket::parse(&ack).unwrap();

        assert_eq!(response.code, Code::AccountingResponse.as_u8());
        assert_eq!(response.identifier, 7);
        assert_eq!(
            response.attribute(kind::REPLY_MESSAGE).unwrap().as_text(),
            ACK_REPLY_MESSAGE
        );
        assert_eq!(
            response.attribute(kind::ACCT_SESSION_ID).unwrap().as_text(),
            "S1"
        );
    }

    #[test]
    fn test_ack_without_session_id_has_no_attributes() {
        let codec = codec();
        let wire = request(vec![Attribute::integer(kind::ACCT_STATUS_TYPE, 1)]);
        let decoded = codec.decode(&wire, client()).unwrap();

        let ack = codec.encode_ack(&decoded.packet, None);
        let response = RadiusPacket::parse(&ack).unwrap();
        assert!(response.attributes.is_empty());
    }
}
