use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthPromptListener;
use crate::listener::StreamListener;
use crate::status::ChannelStatus;

/// Stable identity of one network request/response exchange.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl ChannelId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[default]
    Http,
    File,
    Data,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel already opened")]
    AlreadyOpened,
    #[error("operation not supported by {0:?} channels")]
    Unsupported(ChannelKind),
    #[error("channel error: {0}")]
    Other(String),
}

/// One `Server-Timing` metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerTimingEntry {
    pub name: String,
    pub duration: f64,
    pub description: String,
}

/// Service-worker interception timestamps (microseconds) of a timed channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedChannelInfo {
    pub launch_service_worker_start: i64,
    pub launch_service_worker_end: i64,
    pub dispatch_fetch_event_start: i64,
    pub handle_fetch_event_end: i64,
}

/// Local content served in place of the network response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverrideContent {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Upload shaping parameters, bytes per second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadThrottle {
    pub mean_bps: u64,
    pub max_bps: u64,
}

/// A single network request as seen by observers.
///
/// Handles are borrowed from the network stack; the monitor never owns the
/// underlying request and only keys its bookkeeping on [`Channel::id`].
pub trait Channel: Send + Sync {
    fn id(&self) -> ChannelId;

    fn kind(&self) -> ChannelKind {
        ChannelKind::Http
    }

    fn url(&self) -> String;

    fn method(&self) -> String {
        "GET".to_owned()
    }

    fn status(&self) -> ChannelStatus;

    fn response_status(&self) -> Option<u16>;

    fn response_status_text(&self) -> Option<String> {
        None
    }

    fn content_type(&self) -> Option<String>;

    fn content_charset(&self) -> Option<String>;

    fn content_length(&self) -> Option<u64> {
        None
    }

    fn request_header(&self, _name: &str) -> Option<String> {
        None
    }

    fn response_header(&self, name: &str) -> Option<String>;

    /// Contents of the readable upload stream, if the request has one.
    fn upload_body(&self) -> Option<Vec<u8>> {
        None
    }

    fn is_preload(&self) -> bool {
        false
    }

    fn is_proxied(&self) -> bool {
        false
    }

    /// Platform blocking reason code, 0 when the request was not blocked.
    fn request_blocking_reason(&self) -> u32 {
        0
    }

    fn cancelled_by_extension(&self) -> Option<String> {
        None
    }

    fn timed_info(&self) -> Option<TimedChannelInfo> {
        None
    }

    fn cancel(&self, status: ChannelStatus);

    /// Replace the head of the listener chain, returning the previous head.
    fn set_new_listener(
        &self,
        listener: Arc<dyn StreamListener>,
    ) -> Result<Arc<dyn StreamListener>, ChannelError>;

    fn set_override_content(&self, content: OverrideContent) -> Result<(), ChannelError>;

    fn set_upload_throttle(&self, _throttle: UploadThrottle) {}

    fn set_auth_prompt_listener(&self, _listener: Arc<dyn AuthPromptListener>) {}
}

pub type ChannelRef = Arc<dyn Channel>;
