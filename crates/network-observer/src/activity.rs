use std::collections::HashMap;
use std::sync::Arc;

use network_throttle::DownloadThrottle;
use serde::{Deserialize, Serialize};
use soulbrowser_core_types::{ActivitySubtype, ChannelId, ChannelRef};
use url::Url;

use crate::blocking::BlockedReason;
use crate::owner::NetworkEventOwner;

/// First and last time a lifecycle stage was entered, in microseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub first: i64,
    pub last: i64,
}

/// Lifecycle stage timestamps keyed by stage name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StageTimings {
    stages: HashMap<&'static str, StageTiming>,
}

impl StageTimings {
    /// Record `timestamp` for the subtype's stage, widening `last` on revisits.
    /// Subtypes without a stage are ignored.
    pub fn record(&mut self, subtype: ActivitySubtype, timestamp: i64) {
        let Some(stage) = subtype.stage_name() else {
            return;
        };
        self.stages
            .entry(stage)
            .and_modify(|timing| timing.last = timestamp)
            .or_insert(StageTiming {
                first: timestamp,
                last: timestamp,
            });
    }

    /// Overwrite the request-header stage with a single instant.
    pub fn set_request_header(&mut self, timestamp: i64) {
        self.stages.insert(
            "REQUEST_HEADER",
            StageTiming {
                first: timestamp,
                last: timestamp,
            },
        );
    }

    pub fn get(&self, subtype: ActivitySubtype) -> Option<StageTiming> {
        subtype
            .stage_name()
            .and_then(|stage| self.stages.get(stage).copied())
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Bookkeeping for one observed channel.
pub struct HttpActivity {
    pub id: ChannelId,
    pub channel: ChannelRef,
    pub url: String,
    pub hostname: String,
    pub charset: String,
    /// Captured request body waiting to be sent to the owner.
    pub sent_body: Option<String>,
    pub request_body_sent: bool,
    pub request_raw_headers: Option<String>,
    pub response_raw_headers: Option<String>,
    pub proxy_response_raw_headers: Option<String>,
    pub early_hints_response_raw_headers: Option<String>,
    pub body_size: u64,
    pub headers_size: u64,
    pub from_cache: bool,
    pub from_service_worker: bool,
    pub is_overridden: bool,
    pub discard_request_body: bool,
    pub discard_response_body: bool,
    pub timings: StageTimings,
    /// Status of the first examined response. A 304 revalidation later
    /// swapped for the cached 200 must not replace it.
    pub response_status: Option<u16>,
    pub response_started: bool,
    pub blocked_reason: Option<BlockedReason>,
    pub blocking_extension: Option<String>,
    pub in_progress: bool,
    pub download_throttle: Option<Arc<DownloadThrottle>>,
    pub owner: Option<Arc<dyn NetworkEventOwner>>,
    /// Set once a trigger claimed the right to create the owner.
    pub(crate) reporting: bool,
}

impl HttpActivity {
    pub fn new(channel: ChannelRef, save_bodies: bool) -> Self {
        let url = channel.url();
        let hostname = Url::parse(&url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_owned))
            .unwrap_or_default();
        let charset = channel.content_charset().unwrap_or_default();
        Self {
            id: channel.id(),
            channel,
            url,
            hostname,
            charset,
            sent_body: None,
            request_body_sent: false,
            request_raw_headers: None,
            response_raw_headers: None,
            proxy_response_raw_headers: None,
            early_hints_response_raw_headers: None,
            body_size: 0,
            headers_size: 0,
            from_cache: false,
            from_service_worker: false,
            is_overridden: false,
            discard_request_body: !save_bodies,
            discard_response_body: !save_bodies,
            timings: StageTimings::default(),
            response_status: None,
            response_started: false,
            blocked_reason: None,
            blocking_extension: None,
            in_progress: false,
            download_throttle: None,
            owner: None,
            reporting: false,
        }
    }
}
