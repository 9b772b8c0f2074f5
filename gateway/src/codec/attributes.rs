//! RADIUS attribute numbers and enumerated values used by accounting
//!
//! Numbers follow RFC 2865 (base attributes), RFC 2866 (accounting) and
//! RFC 2869 (gigawords, event timestamp, NAS-Port-Id).

/// Attribute type numbers
pub mod kind {
    pub const USER_NAME: u8 = 1;
    pub const NAS_IP_ADDRESS: u8 = 4;
    pub const FRAMED_IP_ADDRESS: u8 = 8;
    pub const REPLY_MESSAGE: u8 = 18;
    pub const NAS_IDENTIFIER: u8 = 32;
    pub const ACCT_STATUS_TYPE: u8 = 40;
    pub const ACCT_DELAY_TIME: u8 = 41;
    pub const ACCT_INPUT_OCTETS: u8 = 42;
    pub const ACCT_OUTPUT_OCTETS: u8 = 43;
    pub const ACCT_SESSION_ID: u8 = 44;
    pub const ACCT_SESSION_TIME: u8 = 46;
    pub const ACCT_INPUT_PACKETS: u8 = 47;
    pub const ACCT_OUTPUT_PACKETS: u8 = 48;
    pub const ACCT_TERMINATE_CAUSE: u8 = 49;
    pub const ACCT_INPUT_GIGAWORDS: u8 = 52;
    pub const ACCT_OUTPUT_GIGAWORDS: u8 = 53;
    pub const EVENT_TIMESTAMP: u8 = 55;
    pub const NAS_PORT_TYPE: u8 = 61;
    pub const NAS_PORT_ID: u8 = 87;
}

/// Acct-Status-Type values (RFC 2866 section 5.1) handled by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AcctStatusType {
    /// Start (1) - session has begun
    Start = 1,
    /// Stop (2) - session has ended
    Stop = 2,
    /// Interim-Update (3) - periodic update during a session
    InterimUpdate = 3,
}

impl AcctStatusType {
    /// Convert from the wire value
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(AcctStatusType::Start),
            2 => Some(AcctStatusType::Stop),
            3 => Some(AcctStatusType::InterimUpdate),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Acct-Terminate-Cause values (RFC 2866 section 5.10)
///
/// Only used for logging; the cause is not part of the published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TerminateCause {
    UserRequest = 1,
    LostCarrier = 2,
    LostService = 3,
    IdleTimeout = 4,
    SessionTimeout = 5,
    AdminReset = 6,
    AdminReboot = 7,
    PortError = 8,
    NasError = 9,
    NasRequest = 10,
    NasReboot = 11,
    PortUnneeded = 12,
    PortPreempted = 13,
    PortSuspended = 14,
    ServiceUnavailable = 15,
    Callback = 16,
    UserError = 17,
    HostRequest = 18,
}

impl TerminateCause {
    /// Convert from the wire value
    pub fn from_u32(value: u32) -> Option<Self> {
        use TerminateCause::*;
        let cause = match value {
            1 => UserRequest,
            2 => LostCarrier,
            3 => LostService,
            4 => IdleTimeout,
            5 => SessionTimeout,
            6 => AdminReset,
            7 => AdminReboot,
            8 => PortError,
            9 => NasError,
            10 => NasRequest,
            11 => NasReboot,
            12 => PortUnneeded,
            13 => PortPreempted,
            14 => PortSuspended,
            15 => ServiceUnavailable,
            16 => Callback,
            17 => UserError,
            18 => HostRequest,
            _ => return None,
        };
        Some(cause)
    }

    /// RFC 2866 name of the cause
    pub fn name(self) -> &'static str {
        use TerminateCause::*;
        match self {
            UserRequest => "User-Request",
            LostCarrier => "Lost-Carrier",
            LostService => "Lost-Service",
            IdleTimeout => "Idle-Timeout",
            SessionTimeout => "Session-Timeout",
            AdminReset => "Admin-Reset",
            AdminReboot => "Admin-Reboot",
            PortError => "Port-Error",
            NasError => "NAS-Error",
            NasRequest => "NAS-Request",
            NasReboot => "NAS-Reboot",
            PortUnneeded => "Port-Unneeded",
            PortPreempted => "Port-Preempted",
            PortSuspended => "Port-Suspended",
            ServiceUnavailable => "Service-Unavailable",
            Callback => "Callback",
            UserError => "User-Error",
            HostRequest => "Host-Request",
        }
    }

    /// Human-readable description for any wire value
    pub fn describe(value: u32) -> String {
        match Self::from_u32(value) {
            Some(cause) => cause.name().to_string(),
            None => format!("Unknown ({value})"),
        }
    }
}
