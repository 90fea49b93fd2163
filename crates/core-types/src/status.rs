use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Request status as reported by the network stack.
///
/// Failure codes carry the high bit, mirroring the platform's result codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum ChannelStatus {
    Ok,
    BindingAborted,
    BindingRedirected,
    ErrorAbort,
    ParsedDataCached,
    ImagelibFailure,
    UnknownHost,
    ConnectionRefused,
    NetTimeout,
    NetReset,
    ContentBlocked,
    TrackingUri,
    Other(u32),
}

const NAMED: &[(ChannelStatus, u32, &str)] = &[
    (ChannelStatus::Ok, 0x0000_0000, "NS_OK"),
    (ChannelStatus::BindingAborted, 0x804B_0002, "NS_BINDING_ABORTED"),
    (ChannelStatus::BindingRedirected, 0x804B_0003, "NS_BINDING_REDIRECTED"),
    (ChannelStatus::ErrorAbort, 0x8000_4004, "NS_ERROR_ABORT"),
    (ChannelStatus::ParsedDataCached, 0x805D_0021, "NS_ERROR_PARSED_DATA_CACHED"),
    (ChannelStatus::ImagelibFailure, 0x8054_0005, "NS_IMAGELIB_ERROR_FAILURE"),
    (ChannelStatus::UnknownHost, 0x804B_001E, "NS_ERROR_UNKNOWN_HOST"),
    (ChannelStatus::ConnectionRefused, 0x804B_000D, "NS_ERROR_CONNECTION_REFUSED"),
    (ChannelStatus::NetTimeout, 0x804B_000E, "NS_ERROR_NET_TIMEOUT"),
    (ChannelStatus::NetReset, 0x804B_0014, "NS_ERROR_NET_RESET"),
    (ChannelStatus::ContentBlocked, 0x805E_0006, "NS_ERROR_CONTENT_BLOCKED"),
    (ChannelStatus::TrackingUri, 0x805D_0022, "NS_ERROR_TRACKING_URI"),
];

impl ChannelStatus {
    pub fn from_raw(raw: u32) -> Self {
        NAMED
            .iter()
            .find(|(_, code, _)| *code == raw)
            .map(|(status, _, _)| *status)
            .unwrap_or(ChannelStatus::Other(raw))
    }

    pub fn raw(self) -> u32 {
        match self {
            ChannelStatus::Other(raw) => raw,
            named => NAMED
                .iter()
                .find(|(status, _, _)| *status == named)
                .map(|(_, code, _)| *code)
                .unwrap_or_default(),
        }
    }

    pub fn is_success(self) -> bool {
        self.raw() & 0x8000_0000 == 0
    }

    /// Platform name of a failure code, `None` for success codes.
    pub fn error_name(self) -> Option<Cow<'static, str>> {
        if self.is_success() {
            return None;
        }
        let named = NAMED
            .iter()
            .find(|(status, _, _)| *status == self)
            .map(|(_, _, name)| Cow::Borrowed(*name));
        Some(named.unwrap_or_else(|| Cow::Owned(format!("0x{:08X}", self.raw()))))
    }
}

impl From<u32> for ChannelStatus {
    fn from(raw: u32) -> Self {
        ChannelStatus::from_raw(raw)
    }
}

impl From<ChannelStatus> for u32 {
    fn from(status: ChannelStatus) -> Self {
        status.raw()
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error_name() {
            Some(name) => f.write_str(&name),
            None => f.write_str("NS_OK"),
        }
    }
}
