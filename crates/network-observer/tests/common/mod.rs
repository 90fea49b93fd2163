#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use network_observer::{
    CacheDetails, HarOffsets, HarTimings, NetworkEventInit, NetworkEventOwner, NetworkObserver,
    ObserverConfig, PlatformServices, PostData, RawHeaders, ResponseContent, ResponseContentInfo,
    ResponseStart, SecurityInfo, ServiceWorkerTimings,
};
use parking_lot::Mutex;
use soulbrowser_core_types::{
    ActivitySubtype, ActivityType, AuthPrompt, AuthResponder, ChannelRef, ServerTimingEntry, Topic,
};
use soulbrowser_event_bus::{ChannelSpec, SimChannel, SimPlatform};

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    ResponseStart(ResponseStart),
    RawHeaders(RawHeaders),
    PostData(PostData),
    CacheDetails(CacheDetails),
    SecurityInfo(SecurityInfo),
    ServerTimings(Vec<ServerTimingEntry>),
    ServiceWorkerTimings(ServiceWorkerTimings),
    EventTimings {
        total: i64,
        timings: HarTimings,
        offsets: HarOffsets,
    },
    ResponseContent(ResponseContent, ResponseContentInfo),
}

pub struct RecordingOwner {
    pub init: NetworkEventInit,
    pub is_proxy: bool,
    credentials: Option<(String, String)>,
    calls: Mutex<Vec<Call>>,
}

impl RecordingOwner {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn response_starts(&self) -> Vec<ResponseStart> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::ResponseStart(start) => Some(start),
                _ => None,
            })
            .collect()
    }

    pub fn post_data(&self) -> Vec<PostData> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::PostData(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    pub fn contents(&self) -> Vec<(ResponseContent, ResponseContentInfo)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::ResponseContent(content, info) => Some((content, info)),
                _ => None,
            })
            .collect()
    }

    pub fn event_timings(&self) -> Vec<(i64, HarTimings, HarOffsets)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::EventTimings {
                    total,
                    timings,
                    offsets,
                } => Some((total, timings, offsets)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl NetworkEventOwner for RecordingOwner {
    fn add_response_start(&self, response: ResponseStart) {
        self.push(Call::ResponseStart(response));
    }

    fn add_raw_headers(&self, headers: RawHeaders) {
        self.push(Call::RawHeaders(headers));
    }

    fn add_request_post_data(&self, post_data: PostData) {
        self.push(Call::PostData(post_data));
    }

    fn add_cache_details(&self, details: CacheDetails) {
        self.push(Call::CacheDetails(details));
    }

    fn add_security_info(&self, info: SecurityInfo) {
        self.push(Call::SecurityInfo(info));
    }

    fn add_server_timings(&self, timings: Vec<ServerTimingEntry>) {
        self.push(Call::ServerTimings(timings));
    }

    fn add_service_worker_timings(&self, timings: ServiceWorkerTimings) {
        self.push(Call::ServiceWorkerTimings(timings));
    }

    fn add_event_timings(&self, total: i64, timings: HarTimings, offsets: HarOffsets) {
        self.push(Call::EventTimings {
            total,
            timings,
            offsets,
        });
    }

    fn add_response_content(&self, content: ResponseContent, info: ResponseContentInfo) {
        self.push(Call::ResponseContent(content, info));
    }

    fn on_auth_prompt(&self, _prompt: AuthPrompt, responder: Box<dyn AuthResponder>) {
        match &self.credentials {
            Some((username, password)) => responder.provide_credentials(username, password),
            None => responder.forward(),
        }
    }
}

pub fn services(platform: &SimPlatform) -> PlatformServices {
    PlatformServices::new(platform.activity.clone(), platform.topics.clone())
        .with_resource_cache(platform.cache.clone())
}

/// An observer wired to a simulated platform, recording every owner it creates.
pub struct Harness {
    pub platform: SimPlatform,
    pub observer: NetworkObserver,
    owners: Arc<Mutex<Vec<Arc<RecordingOwner>>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ObserverConfig::default())
    }

    pub fn with_config(config: ObserverConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_credentials(config: ObserverConfig, username: &str, password: &str) -> Self {
        Self::build(config, Some((username.to_owned(), password.to_owned())))
    }

    fn build(config: ObserverConfig, credentials: Option<(String, String)>) -> Self {
        let platform = SimPlatform::default();
        let owners: Arc<Mutex<Vec<Arc<RecordingOwner>>>> = Arc::default();
        let created = owners.clone();
        let flaked = Arc::new(AtomicBool::new(false));
        let observer = NetworkObserver::builder()
            .ignore_channel(|channel: &ChannelRef| channel.url().contains("ignored.test"))
            .on_network_event(
                move |init: NetworkEventInit, _channel: &ChannelRef, is_proxy: bool| {
                    if init.url.contains("panic.test") {
                        panic!("owner construction failed");
                    }
                    if init.url.contains("flaky.test") && !flaked.swap(true, Ordering::SeqCst) {
                        panic!("owner construction failed once");
                    }
                    let owner = Arc::new(RecordingOwner {
                        init,
                        is_proxy,
                        credentials: credentials.clone(),
                        calls: Mutex::new(Vec::new()),
                    });
                    created.lock().push(owner.clone());
                    owner as Arc<dyn NetworkEventOwner>
                },
            )
            .config(config)
            .services(services(&platform))
            .build()
            .expect("observer builds");
        Self {
            platform,
            observer,
            owners,
        }
    }

    pub fn owners(&self) -> Vec<Arc<RecordingOwner>> {
        self.owners.lock().clone()
    }

    pub fn only_owner(&self) -> Arc<RecordingOwner> {
        let owners = self.owners();
        assert_eq!(owners.len(), 1, "expected exactly one network event");
        owners[0].clone()
    }

    pub fn topic(&self, channel: &Arc<SimChannel>, topic: Topic) {
        let subject: ChannelRef = channel.clone();
        self.platform.topics.notify_topic(&subject, topic);
    }

    pub fn activity(
        &self,
        channel: &Arc<SimChannel>,
        subtype: ActivitySubtype,
        timestamp: i64,
        extra: &str,
    ) {
        let subject: ChannelRef = channel.clone();
        self.platform.activity.publish(
            &subject,
            ActivityType::HTTP_TRANSACTION,
            subtype.raw(),
            timestamp,
            0,
            extra,
        );
    }
}

pub fn http(url: &str) -> ChannelSpec {
    ChannelSpec {
        response_status: Some(200),
        status_text: Some("OK".to_owned()),
        content_type: Some("text/plain".to_owned()),
        charset: Some("utf-8".to_owned()),
        ..ChannelSpec::new(url)
    }
}
