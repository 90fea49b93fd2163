//! Decoding of the raw `(activity_type, activity_subtype)` pairs delivered by the
//! platform's activity distributor.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    SocketTransport,
    HttpTransaction,
    Other(u32),
}

impl ActivityType {
    pub const SOCKET_TRANSPORT: u32 = 0x0001;
    pub const HTTP_TRANSACTION: u32 = 0x0002;

    pub fn from_raw(raw: u32) -> Self {
        match raw {
            Self::SOCKET_TRANSPORT => ActivityType::SocketTransport,
            Self::HTTP_TRANSACTION => ActivityType::HttpTransaction,
            other => ActivityType::Other(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            ActivityType::SocketTransport => Self::SOCKET_TRANSPORT,
            ActivityType::HttpTransaction => Self::HTTP_TRANSACTION,
            ActivityType::Other(raw) => raw,
        }
    }

    pub fn is_observed(self) -> bool {
        !matches!(self, ActivityType::Other(_))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ActivitySubtype {
    RequestHeader,
    RequestBodySent,
    ResponseStart,
    ResponseHeader,
    ResponseComplete,
    TransactionClose,
    ProxyResponseHeader,
    EarlyHintResponseHeader,
    StatusResolving,
    StatusResolved,
    StatusConnectingTo,
    StatusConnectedTo,
    StatusSendingTo,
    StatusWaitingFor,
    StatusReceivingFrom,
    StatusTlsStarting,
    StatusTlsEnding,
    Other(u32),
}

// (subtype, platform code, timing stage name)
const SUBTYPES: &[(ActivitySubtype, u32, Option<&str>)] = &[
    (ActivitySubtype::RequestHeader, 0x5001, Some("REQUEST_HEADER")),
    (ActivitySubtype::RequestBodySent, 0x5002, Some("REQUEST_BODY_SENT")),
    (ActivitySubtype::ResponseStart, 0x5003, Some("RESPONSE_START")),
    (ActivitySubtype::ResponseHeader, 0x5004, Some("RESPONSE_HEADER")),
    (ActivitySubtype::ResponseComplete, 0x5005, Some("RESPONSE_COMPLETE")),
    (ActivitySubtype::TransactionClose, 0x5006, Some("TRANSACTION_CLOSE")),
    (ActivitySubtype::ProxyResponseHeader, 0x5007, None),
    (
        ActivitySubtype::EarlyHintResponseHeader,
        0x500C,
        Some("EARLYHINT_RESPONSE_HEADER"),
    ),
    (ActivitySubtype::StatusResolving, 0x004B_0003, Some("STATUS_RESOLVING")),
    (ActivitySubtype::StatusResolved, 0x004B_000B, Some("STATUS_RESOLVED")),
    (ActivitySubtype::StatusConnectingTo, 0x004B_0007, Some("STATUS_CONNECTING_TO")),
    (ActivitySubtype::StatusConnectedTo, 0x004B_0004, Some("STATUS_CONNECTED_TO")),
    (ActivitySubtype::StatusSendingTo, 0x004B_0005, Some("STATUS_SENDING_TO")),
    (ActivitySubtype::StatusWaitingFor, 0x004B_000A, Some("STATUS_WAITING_FOR")),
    (ActivitySubtype::StatusReceivingFrom, 0x004B_0006, Some("STATUS_RECEIVING_FROM")),
    (ActivitySubtype::StatusTlsStarting, 0x004B_000C, Some("STATUS_TLS_STARTING")),
    (ActivitySubtype::StatusTlsEnding, 0x004B_000D, Some("STATUS_TLS_ENDING")),
];

impl ActivitySubtype {
    pub fn from_raw(raw: u32) -> Self {
        SUBTYPES
            .iter()
            .find(|(_, code, _)| *code == raw)
            .map(|(subtype, _, _)| *subtype)
            .unwrap_or(ActivitySubtype::Other(raw))
    }

    pub fn raw(self) -> u32 {
        match self {
            ActivitySubtype::Other(raw) => raw,
            known => SUBTYPES
                .iter()
                .find(|(subtype, _, _)| *subtype == known)
                .map(|(_, code, _)| *code)
                .unwrap_or_default(),
        }
    }

    /// Name of the timing stage this subtype is recorded under, if any.
    pub fn stage_name(self) -> Option<&'static str> {
        SUBTYPES
            .iter()
            .find(|(subtype, _, _)| *subtype == self)
            .and_then(|(_, _, stage)| *stage)
    }

    /// Subtypes a download throttle holds back until it releases data.
    pub fn is_download(self) -> bool {
        matches!(
            self,
            ActivitySubtype::ResponseStart
                | ActivitySubtype::ResponseHeader
                | ActivitySubtype::ResponseComplete
                | ActivitySubtype::TransactionClose
        )
    }
}

/// A fully decoded activity notification.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivityEvent {
    pub activity_type: ActivityType,
    pub subtype: ActivitySubtype,
    /// Microseconds since the epoch.
    pub timestamp: i64,
    pub extra_size: u64,
    pub extra_string: String,
}

impl ActivityEvent {
    pub fn decode(
        activity_type: u32,
        activity_subtype: u32,
        timestamp: i64,
        extra_size: u64,
        extra_string: &str,
    ) -> Self {
        Self {
            activity_type: ActivityType::from_raw(activity_type),
            subtype: ActivitySubtype::from_raw(activity_subtype),
            timestamp,
            extra_size,
            extra_string: extra_string.to_owned(),
        }
    }

    /// Same event, re-stamped. Used when a throttle replays it later.
    pub fn restamped(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}
