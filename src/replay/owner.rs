use std::collections::HashMap;
use std::sync::Arc;

use network_observer::{
    CacheDetails, HarOffsets, HarTimings, NetworkEventInit, NetworkEventOwner, PostData,
    RawHeaders, ResponseContent, ResponseContentInfo, ResponseStart, SecurityInfo,
    ServiceWorkerTimings,
};
use parking_lot::Mutex;
use serde::Serialize;
use soulbrowser_core_types::{AuthPrompt, AuthResponder, ChannelId, ServerTimingEntry};

/// Everything the observer told an owner, in the order it happened.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum OwnerCall {
    NetworkEvent {
        init: NetworkEventInit,
        is_proxy: bool,
    },
    ResponseStart(ResponseStart),
    RawHeaders(RawHeaders),
    RequestPostData(PostData),
    CacheDetails(CacheDetails),
    SecurityInfo(SecurityInfo),
    ServerTimings {
        timings: Vec<ServerTimingEntry>,
    },
    ServiceWorkerTimings(ServiceWorkerTimings),
    EventTimings {
        total: i64,
        timings: HarTimings,
        offsets: HarOffsets,
    },
    ResponseContent {
        content: ResponseContent,
        info: ResponseContentInfo,
    },
    AuthPrompt(AuthPrompt),
}

impl OwnerCall {
    pub fn name(&self) -> &'static str {
        match self {
            OwnerCall::NetworkEvent { .. } => "network_event",
            OwnerCall::ResponseStart(_) => "response_start",
            OwnerCall::RawHeaders(_) => "raw_headers",
            OwnerCall::RequestPostData(_) => "request_post_data",
            OwnerCall::CacheDetails(_) => "cache_details",
            OwnerCall::SecurityInfo(_) => "security_info",
            OwnerCall::ServerTimings { .. } => "server_timings",
            OwnerCall::ServiceWorkerTimings(_) => "service_worker_timings",
            OwnerCall::EventTimings { .. } => "event_timings",
            OwnerCall::ResponseContent { .. } => "response_content",
            OwnerCall::AuthPrompt(_) => "auth_prompt",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReplayRecord {
    pub channel: String,
    #[serde(flatten)]
    pub call: OwnerCall,
}

/// Shared log of owner calls, keyed back to script labels.
#[derive(Clone, Default)]
pub struct CallLog {
    labels: Arc<Mutex<HashMap<ChannelId, String>>>,
    records: Arc<Mutex<Vec<ReplayRecord>>>,
}

impl CallLog {
    pub fn label(&self, id: ChannelId, label: &str) {
        self.labels.lock().insert(id, label.to_owned());
    }

    pub fn push(&self, id: ChannelId, call: OwnerCall) {
        let channel = self
            .labels
            .lock()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string());
        self.records.lock().push(ReplayRecord { channel, call });
    }

    pub fn records(&self) -> Vec<ReplayRecord> {
        self.records.lock().clone()
    }
}

/// Owner that writes every call to a [`CallLog`].
pub struct LoggingOwner {
    id: ChannelId,
    log: CallLog,
}

impl LoggingOwner {
    pub fn new(id: ChannelId, log: CallLog) -> Self {
        Self { id, log }
    }

    fn push(&self, call: OwnerCall) {
        self.log.push(self.id, call);
    }
}

impl NetworkEventOwner for LoggingOwner {
    fn add_response_start(&self, response: ResponseStart) {
        self.push(OwnerCall::ResponseStart(response));
    }

    fn add_raw_headers(&self, headers: RawHeaders) {
        self.push(OwnerCall::RawHeaders(headers));
    }

    fn add_request_post_data(&self, post_data: PostData) {
        self.push(OwnerCall::RequestPostData(post_data));
    }

    fn add_cache_details(&self, details: CacheDetails) {
        self.push(OwnerCall::CacheDetails(details));
    }

    fn add_security_info(&self, info: SecurityInfo) {
        self.push(OwnerCall::SecurityInfo(info));
    }

    fn add_server_timings(&self, timings: Vec<ServerTimingEntry>) {
        self.push(OwnerCall::ServerTimings { timings });
    }

    fn add_service_worker_timings(&self, timings: ServiceWorkerTimings) {
        self.push(OwnerCall::ServiceWorkerTimings(timings));
    }

    fn add_event_timings(&self, total: i64, timings: HarTimings, offsets: HarOffsets) {
        self.push(OwnerCall::EventTimings {
            total,
            timings,
            offsets,
        });
    }

    fn add_response_content(&self, content: ResponseContent, info: ResponseContentInfo) {
        self.push(OwnerCall::ResponseContent { content, info });
    }

    fn on_auth_prompt(&self, prompt: AuthPrompt, responder: Box<dyn AuthResponder>) {
        self.push(OwnerCall::AuthPrompt(prompt));
        responder.forward();
    }
}
