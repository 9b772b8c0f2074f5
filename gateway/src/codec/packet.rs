//! RADIUS packet wire format (RFC 2865 section 3, RFC 2866 section 3)
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Code      |  Identifier   |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Authenticator (16)                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Attributes ... (Type, Length, Value)
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-
//! ```
//!
//! Accounting packets are signed with the shared secret: the request
//! authenticator is `MD5(header with zeroed authenticator | attributes | secret)`,
//! the response authenticator is `MD5(header with request authenticator | attributes | secret)`.

use super::DecodeError;
use bytes::{BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use std::net::Ipv4Addr;

/// Fixed header size
pub const HEADER_LEN: usize = 20;
/// Largest packet allowed by RFC 2865
pub const MAX_PACKET_LEN: usize = 4096;
/// Largest attribute value (length octet covers type and length)
pub const MAX_ATTRIBUTE_VALUE_LEN: usize = 253;

/// Packet codes used by accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Code {
    AccountingRequest = 4,
    AccountingResponse = 5,
}

impl Code {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            4 => Some(Code::AccountingRequest),
            5 => Some(Code::AccountingResponse),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A single Type-Length-Value attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub kind: u8,
    pub value: Bytes,
}

impl Attribute {
    /// Raw attribute; values longer than 253 octets are truncated
    pub fn new(kind: u8, value: impl Into<Bytes>) -> Self {
        let mut value: Bytes = value.into();
        value.truncate(MAX_ATTRIBUTE_VALUE_LEN);
        Self { kind, value }
    }

    pub fn text(kind: u8, text: &str) -> Self {
        Self::new(kind, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn integer(kind: u8, value: u32) -> Self {
        Self::new(kind, Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    pub fn ipv4(kind: u8, addr: Ipv4Addr) -> Self {
        Self::new(kind, Bytes::copy_from_slice(&addr.octets()))
    }

    /// Text value; invalid UTF-8 is replaced rather than rejected
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }

    /// 32-bit integer value (also used for `time` attributes)
    pub fn as_u32(&self) -> Result<u32, DecodeError> {
        let octets: [u8; 4] = self
            .value
            .as_ref()
            .try_into()
            .map_err(|_| self.invalid_value())?;
        Ok(u32::from_be_bytes(octets))
    }

    pub fn as_ipv4(&self) -> Result<Ipv4Addr, DecodeError> {
        let octets: [u8; 4] = self
            .value
            .as_ref()
            .try_into()
            .map_err(|_| self.invalid_value())?;
        Ok(Ipv4Addr::from(octets))
    }

    fn invalid_value(&self) -> DecodeError {
        DecodeError::InvalidAttributeValue {
            kind: self.kind,
            len: self.value.len(),
        }
    }

    fn wire_len(&self) -> usize {
        2 + self.value.len()
    }
}

/// A parsed RADIUS packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadiusPacket {
    pub code: u8,
    pub identifier: u8,
    pub authenticator: [u8; 16],
    pub attributes: Vec<Attribute>,
}

impl RadiusPacket {
    /// Build an unsigned Accounting-Request
    pub fn accounting_request(identifier: u8, attributes: Vec<Attribute>) -> Self {
        Self {
            code: Code::AccountingRequest.as_u8(),
            identifier,
            authenticator: [0; 16],
            attributes,
        }
    }

    /// Build the Accounting-Response for `request`
    ///
    /// The authenticator field holds the request authenticator until the
    /// response is signed by [`RadiusPacket::encode_response`].
    pub fn accounting_response(request: &RadiusPacket, attributes: Vec<Attribute>) -> Self {
        Self {
            code: Code::AccountingResponse.as_u8(),
            identifier: request.identifier,
            authenticator: request.authenticator,
            attributes,
        }
    }

    /// Parse a datagram
    ///
    /// Octets beyond the declared Length are padding and ignored.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_LEN {
            return Err(DecodeError::TooShort(data.len()));
        }

        let declared = usize::from(u16::from_be_bytes([data[2], data[3]]));
        if !(HEADER_LEN..=MAX_PACKET_LEN).contains(&declared) || declared > data.len() {
            return Err(DecodeError::InvalidLength {
                declared,
                actual: data.len(),
            });
        }

        let mut authenticator = [0u8; 16];
        authenticator.copy_from_slice(&data[4..HEADER_LEN]);

        let mut attributes = Vec::new();
        let mut offset = HEADER_LEN;
        while offset < declared {
            let (kind, len) = match data.get(offset..offset + 2) {
                Some(&[kind, len]) => (kind, usize::from(len)),
                _ => return Err(DecodeError::MalformedAttribute { offset }),
            };
            if len < 2 || offset + len > declared {
                return Err(DecodeError::MalformedAttribute { offset });
            }
            attributes.push(Attribute {
                kind,
                value: Bytes::copy_from_slice(&data[offset + 2..offset + len]),
            });
            offset += len;
        }

        Ok(Self {
            code: data[0],
            identifier: data[1],
            authenticator,
            attributes,
        })
    }

    /// First attribute of the given type
    pub fn attribute(&self, kind: u8) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.kind == kind)
    }

    /// Encoded size in octets
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.attributes.iter().map(Attribute::wire_len).sum::<usize>()
    }

    /// Check the request authenticator against the shared secret
    pub fn verify_request_authenticator(&self, secret: &[u8]) -> bool {
        let expected = signature(&self.encode_with(&[0; 16]), secret);
        expected == self.authenticator
    }

    /// Encode as a signed Accounting-Request
    pub fn encode_request(&self, secret: &[u8]) -> Bytes {
        self.encode_signed(&[0; 16], secret)
    }

    /// Encode as a signed response to a request carrying `request_authenticator`
    pub fn encode_response(&self, request_authenticator: &[u8; 16], secret: &[u8]) -> Bytes {
        self.encode_signed(request_authenticator, secret)
    }

    fn encode_signed(&self, seed: &[u8; 16], secret: &[u8]) -> Bytes {
        let mut buf = self.encode_with(seed);
        let digest = signature(&buf, secret);
        buf[4..HEADER_LEN].copy_from_slice(&digest);
        buf.freeze()
    }

    fn encode_with(&self, authenticator: &[u8; 16]) -> BytesMut {
        let len = self.encoded_len();
        let mut buf = BytesMut::with_capacity(len);
        buf.put_u8(self.code);
        buf.put_u8(self.identifier);
        buf.put_u16(u16::try_from(len).unwrap_or(u16::MAX));
        buf.put_slice(authenticator);
        for attr in &self.attributes {
            buf.put_u8(attr.kind);
            buf.put_u8(attr.wire_len() as u8);
            buf.put_slice(&attr.value);
        }
        buf
    }
}

fn signature(packet: &[u8], secret: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(packet);
    hasher.update(secret);
    hasher.finalize().into()
}
