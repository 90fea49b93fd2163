mod common;

use std::sync::Arc;

use common::{http, services, Harness};
use network_observer::{
    BlockFilter, BlockedReason, NetworkEventInit, NetworkEventOwner, NetworkObserver,
    ObserverConfig, ObserverError, ProcessKind, ThrottleData,
};
use network_throttle::ThrottleError;
use pretty_assertions::assert_eq;
use soulbrowser_core_types::{
    ActivitySubtype as S, ChannelRef, ChannelStatus, Topic, UploadThrottle,
};
use soulbrowser_event_bus::{ChannelSpec, SimChannel, SimPlatform};

const T: i64 = 1_700_000_000_000_000;

fn throttled(data: ThrottleData) -> Harness {
    Harness::with_config(ObserverConfig {
        throttle: Some(data),
        ..ObserverConfig::default()
    })
}

#[test]
fn blocked_urls_are_cancelled_and_reported_as_devtools() {
    let harness = Harness::new();
    harness
        .observer
        .block_request(&BlockFilter::new("*ads.test*"))
        .unwrap();

    let channel = SimChannel::new(http("https://ads.test/banner.js"));
    harness.topic(&channel, Topic::BeforeConnect);
    channel.stop();

    let owner = harness.only_owner();
    assert_eq!(owner.init.blocked_reason, Some(BlockedReason::DevTools));
    assert_eq!(channel.cancelled(), Some(ChannelStatus::BindingAborted));
    assert!(owner.contents().is_empty());
    let init = serde_json::to_value(&owner.init).unwrap();
    assert_eq!(init["blockedReason"], "devtools");
}

#[test]
fn unblocking_lets_requests_through() {
    let harness = Harness::new();
    let filter = BlockFilter::new("*ads.test*");
    harness.observer.block_request(&filter).unwrap();
    assert_eq!(harness.observer.get_blocked_urls(), vec!["*ads.test*".to_owned()]);
    assert!(harness.observer.unblock_request(&filter));
    assert!(harness.observer.get_blocked_urls().is_empty());

    let channel = SimChannel::new(http("https://ads.test/banner.js"));
    harness.topic(&channel, Topic::BeforeConnect);
    assert_eq!(harness.only_owner().init.blocked_reason, None);
    assert_eq!(channel.cancelled(), None);
}

#[test]
fn set_blocked_urls_replaces_the_list() {
    let harness = Harness::new();
    harness
        .observer
        .block_request(&BlockFilter::new("old"))
        .unwrap();
    harness
        .observer
        .set_blocked_urls(&["a*".to_owned(), "b*".to_owned()])
        .unwrap();
    assert_eq!(
        harness.observer.get_blocked_urls(),
        vec!["a*".to_owned(), "b*".to_owned()]
    );
}

#[test]
fn overrides_invalidate_the_cache_and_serve_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    std::fs::write(&path, br#"{"mocked":true}"#).unwrap();
    let url = "https://example.test/api/data";

    let harness = Harness::new();
    harness.observer.override_url(url, path.clone());
    assert_eq!(harness.platform.cache.invalidated(), vec![url.to_owned()]);

    let channel = SimChannel::new(ChannelSpec {
        charset: None,
        ..http(url)
    });
    harness.topic(&channel, Topic::BeforeConnect);
    let served = channel.override_content().expect("override installed");
    assert_eq!(served.content_type, "application/json");
    assert!(channel.respond_with_override().unwrap());

    let owner = harness.only_owner();
    assert!(owner.init.from_cache);
    let contents = owner.contents();
    assert_eq!(contents[0].0.text, r#"{"mocked":true}"#);
    assert_eq!(contents[0].0.mime_type, "application/json");

    harness.observer.remove_override(url);
    assert_eq!(harness.platform.cache.invalidated().len(), 2);
    let again = SimChannel::new(http(url));
    harness.topic(&again, Topic::BeforeConnect);
    assert_eq!(again.override_content(), None);
}

#[test]
fn unreadable_overrides_fall_back_to_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://example.test/missing";
    let harness = Harness::new();
    harness
        .observer
        .override_url(url, dir.path().join("does-not-exist.txt"));

    let channel = SimChannel::new(http(url));
    harness.topic(&channel, Topic::BeforeConnect);
    assert_eq!(channel.override_content(), None);
    assert!(!harness.only_owner().init.from_cache);
}

#[test]
fn throttled_activity_is_replayed_once_the_bytes_are_released() {
    let harness = throttled(ThrottleData {
        download_bps_mean: 1_000_000,
        ..ThrottleData::default()
    });
    let channel = SimChannel::new(http("https://example.test/slow"));
    harness.activity(&channel, S::RequestHeader, T, "GET /slow HTTP/1.1\r\n\r\n");
    harness.topic(&channel, Topic::BeforeConnect);
    assert!(harness.observer.throttle_manager().is_some());

    harness.activity(&channel, S::ResponseStart, T + 1_000, "");
    harness.activity(&channel, S::TransactionClose, T + 2_000, "");
    let owner = harness.only_owner();
    assert!(owner.event_timings().is_empty());

    channel.start().unwrap();
    channel.data(b"abcd").unwrap();
    assert_eq!(channel.consumer().bytes(), b"abcd");
    assert!(owner.event_timings().is_empty());

    channel.stop();
    assert_eq!(owner.event_timings().len(), 1);
    assert_eq!(owner.contents()[0].0.text, "abcd");
}

#[test]
fn uploads_get_the_upload_profile() {
    let harness = throttled(ThrottleData {
        upload_bps_mean: 100,
        ..ThrottleData::default()
    });
    let channel = SimChannel::new(http("https://example.test/upload"));
    harness.topic(&channel, Topic::ModifyRequest);
    assert_eq!(
        channel.upload_throttle(),
        Some(UploadThrottle {
            mean_bps: 100,
            max_bps: 100,
        })
    );
}

#[test]
fn cached_responses_bypass_download_throttling() {
    let harness = throttled(ThrottleData {
        download_bps_mean: 1,
        latency_mean: 10_000,
        latency_max: 10_000,
        ..ThrottleData::default()
    });
    let channel = SimChannel::new(http("https://example.test/cached"));
    harness.topic(&channel, Topic::ExamineCachedResponse);
    channel.respond(b"instant", 3).unwrap();
    assert_eq!(channel.consumer().bytes(), b"instant");
}

#[test]
fn throttle_data_is_validated_and_resettable() {
    let harness = Harness::new();
    assert_eq!(harness.observer.get_throttle_data(), None);

    let err = harness
        .observer
        .set_throttle_data(Some(ThrottleData {
            latency_mean: 50,
            latency_max: 10,
            ..ThrottleData::default()
        }))
        .err();
    assert!(matches!(
        err,
        Some(ObserverError::Throttle(ThrottleError::InvalidRange {
            field: "latency",
            ..
        }))
    ));

    let data = ThrottleData {
        download_bps_mean: 500,
        ..ThrottleData::default()
    };
    harness.observer.set_throttle_data(Some(data.clone())).unwrap();
    assert_eq!(harness.observer.get_throttle_data(), Some(data));
    harness.observer.set_throttle_data(None).unwrap();
    assert_eq!(harness.observer.get_throttle_data(), None);
    assert!(harness.observer.throttle_manager().is_none());
}

#[test]
fn response_body_limit_applies_to_new_requests() {
    let harness = Harness::new();
    harness.observer.set_response_body_limit(3);
    assert_eq!(harness.observer.config().response_body_limit, 3);

    let channel = SimChannel::new(http("https://example.test/short"));
    harness.topic(&channel, Topic::BeforeConnect);
    channel.respond(b"abcdef", 2).unwrap();
    let contents = harness.only_owner().contents();
    assert_eq!(contents[0].0.text, "abc");
    assert!(contents[0].1.truncated);
}

#[test]
fn destroy_unregisters_everything_exactly_once() {
    let harness = Harness::new();
    let platform = harness.platform.clone();
    assert_eq!(platform.activity.observer_count(), 1);
    assert_eq!(platform.topics.observer_count(), Topic::ALL.len());

    harness.observer.destroy();
    harness.observer.destroy();
    assert!(harness.observer.is_destroyed());
    assert_eq!(platform.activity.removal_count(), 1);
    assert_eq!(platform.topics.removal_count(), Topic::ALL.len());
    assert_eq!(platform.topics.observer_count(), 0);

    assert!(matches!(
        harness.observer.block_request(&BlockFilter::new("x")),
        Err(ObserverError::Destroyed)
    ));
    let channel = SimChannel::new(http("https://example.test/late"));
    harness.topic(&channel, Topic::BeforeConnect);
    assert!(harness.owners().is_empty());

    harness.observer.override_url("https://example.test/late", "/tmp/late.json");
    harness.observer.remove_override("https://example.test/late");
    assert!(platform.cache.invalidated().is_empty());

    drop(harness);
    assert_eq!(platform.activity.removal_count(), 1);
    assert_eq!(platform.topics.removal_count(), Topic::ALL.len());
}

#[test]
fn dropping_the_observer_destroys_it() {
    let harness = Harness::new();
    let platform = harness.platform.clone();
    drop(harness);
    assert_eq!(platform.activity.observer_count(), 0);
    assert_eq!(platform.topics.observer_count(), 0);
}

#[test]
fn content_processes_only_listen_to_two_topics() {
    let harness = Harness::with_config(ObserverConfig {
        process: ProcessKind::Content,
        ..ObserverConfig::default()
    });
    assert_eq!(harness.platform.activity.observer_count(), 0);
    assert_eq!(
        harness.platform.topics.subscribed_topics(),
        vec![
            "http-on-failed-opening-request".to_owned(),
            "service-worker-synthesized-response".to_owned(),
        ]
    );
}

#[test]
fn clear_forgets_open_requests() {
    let harness = Harness::new();
    let channel = SimChannel::new(http("https://example.test/open"));
    harness.topic(&channel, Topic::BeforeConnect);
    assert_eq!(harness.observer.open_request_count(), 1);
    harness.observer.clear();
    assert_eq!(harness.observer.open_request_count(), 0);
}

fn unreachable_owner(
    _init: NetworkEventInit,
    _channel: &ChannelRef,
    _is_proxy: bool,
) -> Arc<dyn NetworkEventOwner> {
    unreachable!("no request is observed while building")
}

#[test]
fn builder_reports_what_is_missing() {
    let platform = SimPlatform::default();

    let missing_ignore = NetworkObserver::builder()
        .on_network_event(unreachable_owner)
        .services(services(&platform))
        .build()
        .err();
    assert!(matches!(missing_ignore, Some(ObserverError::MissingIgnoreChannel)));

    let missing_factory = NetworkObserver::builder()
        .ignore_channel(|_: &ChannelRef| false)
        .services(services(&platform))
        .build()
        .err();
    assert!(matches!(
        missing_factory,
        Some(ObserverError::MissingNetworkEventFactory)
    ));

    let missing_services = NetworkObserver::builder()
        .ignore_channel(|_: &ChannelRef| false)
        .on_network_event(unreachable_owner)
        .build()
        .err();
    assert!(matches!(missing_services, Some(ObserverError::MissingServices)));

    let bad_throttle = NetworkObserver::builder()
        .ignore_channel(|_: &ChannelRef| false)
        .on_network_event(unreachable_owner)
        .services(services(&platform))
        .config(ObserverConfig {
            throttle: Some(ThrottleData {
                upload_bps_mean: 10,
                upload_bps_max: 5,
                ..ThrottleData::default()
            }),
            ..ObserverConfig::default()
        })
        .build()
        .err();
    assert!(matches!(bad_throttle, Some(ObserverError::Throttle(_))));
    assert_eq!(platform.activity.observer_count(), 0);
}
