//! The contract between the observer and whoever renders network events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use soulbrowser_core_types::{AuthPrompt, AuthResponder, ChannelId, ChannelRef, ServerTimingEntry};

use crate::blocking::BlockedReason;

/// Everything known about a request at the moment it is first reported.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEventInit {
    pub channel_id: ChannelId,
    pub url: String,
    pub method: String,
    /// Microseconds since the epoch, when a request-header activity was seen.
    pub timestamp: Option<i64>,
    pub from_cache: bool,
    pub from_service_worker: bool,
    pub raw_headers: Option<String>,
    pub blocked_reason: Option<BlockedReason>,
    pub blocking_extension: Option<String>,
    pub discard_request_body: bool,
    pub discard_response_body: bool,
    pub in_progress_request: bool,
    pub is_file_channel: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseStart {
    pub from_cache: bool,
    pub from_service_worker: bool,
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub raw_headers: Option<String>,
    pub proxy_response_raw_headers: Option<String>,
    pub early_hints_response_raw_headers: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHeaders {
    pub raw_headers: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostData {
    pub text: String,
    /// Size of the body before truncation.
    pub size: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDetails {
    pub from_cache: bool,
    pub from_service_worker: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityInfo {
    pub state: String,
}

impl SecurityInfo {
    pub fn insecure() -> Self {
        Self {
            state: "insecure".to_owned(),
        }
    }
}

/// Milliseconds spent in each service-worker phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceWorkerTimings {
    pub launch_service_worker: i64,
    pub request_to_service_worker: i64,
    pub handled_by_service_worker: i64,
}

/// HAR phase durations in milliseconds, -1 when unavailable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarTimings {
    pub blocked: i64,
    pub dns: i64,
    pub connect: i64,
    pub ssl: i64,
    pub send: i64,
    pub wait: i64,
    pub receive: i64,
}

/// Start of each HAR phase in milliseconds, relative to the request start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarOffsets {
    pub blocked: i64,
    pub dns: i64,
    pub connect: i64,
    pub ssl: i64,
    pub send: i64,
    pub wait: i64,
    pub receive: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseContent {
    pub mime_type: String,
    pub text: String,
    /// Size of the decoded body.
    pub size: u64,
    /// Raw bytes kept by the capture, at most the body limit.
    pub body_size: u64,
    /// Bytes received on the wire, headers included.
    pub transferred_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    pub response_status: Option<u16>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseContentInfo {
    pub discard_response_body: bool,
    pub truncated: bool,
    pub blocked_reason: Option<BlockedReason>,
    pub blocking_extension: Option<String>,
}

/// Per-request consumer driven by the observer.
///
/// Calls arrive from whichever thread delivered the platform notification.
pub trait NetworkEventOwner: Send + Sync {
    fn add_response_start(&self, response: ResponseStart);

    fn add_raw_headers(&self, headers: RawHeaders);

    fn add_request_post_data(&self, post_data: PostData);

    fn add_cache_details(&self, details: CacheDetails);

    fn add_security_info(&self, info: SecurityInfo);

    fn add_server_timings(&self, timings: Vec<ServerTimingEntry>);

    fn add_service_worker_timings(&self, timings: ServiceWorkerTimings);

    fn add_event_timings(&self, total: i64, timings: HarTimings, offsets: HarOffsets);

    fn add_response_content(&self, content: ResponseContent, info: ResponseContentInfo);

    /// Owners that do not handle credentials let the platform prompt as usual.
    fn on_auth_prompt(&self, _prompt: AuthPrompt, responder: Box<dyn AuthResponder>) {
        responder.forward();
    }
}

/// Creates the owner of a newly reported request.
pub trait NetworkEventFactory: Send + Sync {
    fn on_network_event(
        &self,
        init: NetworkEventInit,
        channel: &ChannelRef,
        is_proxy: bool,
    ) -> Arc<dyn NetworkEventOwner>;
}

impl<F> NetworkEventFactory for F
where
    F: Fn(NetworkEventInit, &ChannelRef, bool) -> Arc<dyn NetworkEventOwner> + Send + Sync,
{
    fn on_network_event(
        &self,
        init: NetworkEventInit,
        channel: &ChannelRef,
        is_proxy: bool,
    ) -> Arc<dyn NetworkEventOwner> {
        self(init, channel, is_proxy)
    }
}
