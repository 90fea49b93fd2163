use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use network_throttle::{DriverHandle, ThrottleData, ThrottleManager};
use parking_lot::{Mutex, RwLock};
use soulbrowser_core_types::{
    ActivityDistributor, ActivityEvent, ActivityObserver, ActivitySubtype, ChannelId, ChannelKind,
    ChannelRef, ChannelStatus, ObserverHandle, ObserverService, ResourceCache, Topic,
    TopicObserver,
};
use tracing::{debug, info, warn};

use crate::activity::HttpActivity;
use crate::auth::NetworkAuthListener;
use crate::blocking::{
    BlockFilter, BlockList, BlockedInfo, BlockedReason, BlockedReasonResolver,
    NetworkBlockedReasons,
};
use crate::config::{ObserverConfig, ProcessKind};
use crate::error::ObserverError;
use crate::infallible::isolate;
use crate::overrides::{load_override, OverrideTable};
use crate::owner::{
    CacheDetails, NetworkEventFactory, NetworkEventInit, NetworkEventOwner, PostData, RawHeaders,
    ResponseStart, SecurityInfo,
};
use crate::response::{decode_text, CaptureSettings, NetworkResponseListener};
use crate::server_timing::server_timings;
use crate::tee::TeeListener;
use crate::timings::{har_timings, service_worker_timings};

pub type IgnoreChannelFn = dyn Fn(&ChannelRef) -> bool + Send + Sync;

type Record = Arc<Mutex<HttpActivity>>;

/// Host services the observer registers with and consults.
#[derive(Clone)]
pub struct PlatformServices {
    pub activity_distributor: Arc<dyn ActivityDistributor>,
    pub observer_service: Arc<dyn ObserverService>,
    pub resource_cache: Option<Arc<dyn ResourceCache>>,
    pub blocked_reasons: Arc<dyn BlockedReasonResolver>,
}

impl PlatformServices {
    pub fn new(
        activity_distributor: Arc<dyn ActivityDistributor>,
        observer_service: Arc<dyn ObserverService>,
    ) -> Self {
        Self {
            activity_distributor,
            observer_service,
            resource_cache: None,
            blocked_reasons: Arc::new(NetworkBlockedReasons),
        }
    }

    pub fn with_resource_cache(mut self, cache: Arc<dyn ResourceCache>) -> Self {
        self.resource_cache = Some(cache);
        self
    }

    pub fn with_blocked_reasons(mut self, resolver: Arc<dyn BlockedReasonResolver>) -> Self {
        self.blocked_reasons = resolver;
        self
    }
}

#[derive(Default)]
pub struct NetworkObserverBuilder {
    ignore_channel: Option<Box<IgnoreChannelFn>>,
    factory: Option<Arc<dyn NetworkEventFactory>>,
    config: ObserverConfig,
    services: Option<PlatformServices>,
}

impl NetworkObserverBuilder {
    /// Channels for which this returns `true` are never tracked.
    pub fn ignore_channel<F>(mut self, ignore: F) -> Self
    where
        F: Fn(&ChannelRef) -> bool + Send + Sync + 'static,
    {
        self.ignore_channel = Some(Box::new(ignore));
        self
    }

    pub fn on_network_event<F>(mut self, factory: F) -> Self
    where
        F: Fn(NetworkEventInit, &ChannelRef, bool) -> Arc<dyn NetworkEventOwner>
            + Send
            + Sync
            + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn network_event_factory(mut self, factory: Arc<dyn NetworkEventFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn config(mut self, config: ObserverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn services(mut self, services: PlatformServices) -> Self {
        self.services = Some(services);
        self
    }

    /// Validate the callbacks and register with the platform.
    pub fn build(self) -> Result<NetworkObserver, ObserverError> {
        let ignore_channel = self
            .ignore_channel
            .ok_or(ObserverError::MissingIgnoreChannel)?;
        let factory = self
            .factory
            .ok_or(ObserverError::MissingNetworkEventFactory)?;
        let services = self.services.ok_or(ObserverError::MissingServices)?;
        if let Some(throttle) = &self.config.throttle {
            throttle.validate()?;
        }

        let inner = Arc::new(ObserverInner {
            ignore_channel,
            factory,
            services,
            settings: RwLock::new(self.config),
            open_requests: DashMap::new(),
            blocked_urls: RwLock::new(BlockList::default()),
            overrides: RwLock::new(OverrideTable::default()),
            throttle: Mutex::new(ThrottleSlot::default()),
            registrations: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        });
        inner.register();
        Ok(NetworkObserver { inner })
    }
}

/// Correlates activity callbacks and observer topics into one network event
/// per request and drives that event's owner.
///
/// Dropping the observer destroys it.
pub struct NetworkObserver {
    inner: Arc<ObserverInner>,
}

impl NetworkObserver {
    pub fn builder() -> NetworkObserverBuilder {
        NetworkObserverBuilder::default()
    }

    pub fn block_request(&self, filter: &BlockFilter) -> Result<(), ObserverError> {
        self.inner.ensure_alive()?;
        self.inner.blocked_urls.write().insert(&filter.url)
    }

    pub fn unblock_request(&self, filter: &BlockFilter) -> bool {
        self.inner.blocked_urls.write().remove(&filter.url)
    }

    pub fn set_blocked_urls(&self, urls: &[String]) -> Result<(), ObserverError> {
        self.inner.ensure_alive()?;
        self.inner.blocked_urls.write().replace(urls)
    }

    pub fn get_blocked_urls(&self) -> Vec<String> {
        self.inner.blocked_urls.read().patterns()
    }

    /// Serve `url` from the file at `path` from the next request on.
    pub fn override_url(&self, url: &str, path: impl Into<PathBuf>) {
        if self.inner.is_destroyed() {
            return;
        }
        self.inner.overrides.write().insert(url, path);
        self.inner.invalidate_cache(url);
    }

    pub fn remove_override(&self, url: &str) {
        if self.inner.is_destroyed() {
            return;
        }
        self.inner.overrides.write().remove(url);
        self.inner.invalidate_cache(url);
    }

    pub fn set_auth_prompt_listener_enabled(&self, enabled: bool) {
        self.inner.settings.write().auth_prompt_listener = enabled;
    }

    pub fn set_response_body_limit(&self, limit: u64) {
        self.inner.settings.write().response_body_limit = limit;
    }

    /// Only requests created after the change are affected.
    pub fn set_save_request_and_response_bodies(&self, save: bool) {
        self.inner.settings.write().save_request_and_response_bodies = save;
    }

    pub fn get_throttle_data(&self) -> Option<ThrottleData> {
        self.inner.settings.read().throttle.clone()
    }

    /// Replace the throttling profile. The current manager is dropped and a new
    /// one is built on the next request that needs it.
    pub fn set_throttle_data(&self, data: Option<ThrottleData>) -> Result<(), ObserverError> {
        self.inner.ensure_alive()?;
        if let Some(data) = &data {
            data.validate()?;
        }
        self.inner.settings.write().throttle = data;
        *self.inner.throttle.lock() = ThrottleSlot::default();
        Ok(())
    }

    /// Active throttle manager, if one was built. Embedders without a tokio
    /// runtime pump it themselves.
    pub fn throttle_manager(&self) -> Option<Arc<ThrottleManager>> {
        self.inner.throttle.lock().manager.clone()
    }

    pub fn config(&self) -> ObserverConfig {
        self.inner.settings.read().clone()
    }

    /// Forget every open request.
    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn destroy(&self) {
        self.inner.destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    pub fn open_request_count(&self) -> usize {
        self.inner.open_requests.len()
    }
}

impl Drop for NetworkObserver {
    fn drop(&mut self) {
        self.inner.destroy();
    }
}

enum Registration {
    Activity(ObserverHandle),
    Topic(Topic, ObserverHandle),
}

#[derive(Default)]
struct ThrottleSlot {
    manager: Option<Arc<ThrottleManager>>,
    driver: Option<DriverHandle>,
}

#[derive(Default)]
struct EventArgs {
    from_cache: bool,
    from_service_worker: bool,
    blocked: BlockedInfo,
    in_progress: bool,
    is_file_channel: bool,
}

/// Releases a record's reporting claim unless an owner was attached, so a
/// factory that unwinds leaves the request reportable by a later trigger.
struct ReportingClaim<'a> {
    record: &'a Record,
    settled: bool,
}

impl<'a> ReportingClaim<'a> {
    fn new(record: &'a Record) -> Self {
        Self {
            record,
            settled: false,
        }
    }

    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for ReportingClaim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.record.lock().reporting = false;
        }
    }
}

struct ObserverInner {
    ignore_channel: Box<IgnoreChannelFn>,
    factory: Arc<dyn NetworkEventFactory>,
    services: PlatformServices,
    settings: RwLock<ObserverConfig>,
    open_requests: DashMap<ChannelId, Record>,
    blocked_urls: RwLock<BlockList>,
    overrides: RwLock<OverrideTable>,
    throttle: Mutex<ThrottleSlot>,
    registrations: Mutex<Vec<Registration>>,
    destroyed: AtomicBool,
}

struct ActivityAdapter {
    inner: Weak<ObserverInner>,
}

impl ActivityObserver for ActivityAdapter {
    fn observe_activity(
        &self,
        channel: &ChannelRef,
        activity_type: u32,
        activity_subtype: u32,
        timestamp: i64,
        extra_size: u64,
        extra_string: &str,
    ) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let event = ActivityEvent::decode(
            activity_type,
            activity_subtype,
            timestamp,
            extra_size,
            extra_string,
        );
        inner.observe_activity(channel, event);
    }
}

struct TopicAdapter {
    inner: Weak<ObserverInner>,
}

impl TopicObserver for TopicAdapter {
    fn observe(&self, subject: &ChannelRef, topic: &str, _data: Option<&str>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.observe_topic(subject, topic);
        }
    }
}

impl ObserverInner {
    fn register(self: &Arc<Self>) {
        let process = self.settings.read().process;
        let mut registrations = self.registrations.lock();
        let topics: &[Topic] = match process {
            ProcessKind::Parent => {
                let handle = self
                    .services
                    .activity_distributor
                    .add_observer(Arc::new(ActivityAdapter {
                        inner: Arc::downgrade(self),
                    }));
                registrations.push(Registration::Activity(handle));
                &Topic::ALL
            }
            ProcessKind::Content => &Topic::CONTENT_PROCESS,
        };
        for topic in topics {
            let handle = self.services.observer_service.add_observer(
                topic.as_str(),
                Arc::new(TopicAdapter {
                    inner: Arc::downgrade(self),
                }),
            );
            registrations.push(Registration::Topic(*topic, handle));
        }
        info!(
            target: "network-observer",
            ?process,
            registrations = registrations.len(),
            "network observer registered"
        );
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn ensure_alive(&self) -> Result<(), ObserverError> {
        if self.is_destroyed() {
            return Err(ObserverError::Destroyed);
        }
        Ok(())
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let registrations = std::mem::take(&mut *self.registrations.lock());
        for registration in registrations {
            match registration {
                Registration::Activity(handle) => {
                    self.services.activity_distributor.remove_observer(handle);
                }
                Registration::Topic(topic, handle) => {
                    if !self.services.observer_service.remove_observer(handle) {
                        debug!(target: "network-observer", topic = topic.as_str(), "topic already unregistered");
                    }
                }
            }
        }
        self.clear();
        *self.blocked_urls.write() = BlockList::default();
        *self.overrides.write() = OverrideTable::default();
        *self.throttle.lock() = ThrottleSlot::default();
        info!(target: "network-observer", "network observer destroyed");
    }

    fn clear(&self) {
        self.open_requests.clear();
    }

    fn invalidate_cache(&self, url: &str) {
        if let Some(cache) = &self.services.resource_cache {
            cache.invalidate(url);
        }
    }

    fn ignored(&self, channel: &ChannelRef) -> bool {
        (self.ignore_channel)(channel)
    }

    fn create_or_get_activity(&self, channel: &ChannelRef) -> Record {
        if let Some(record) = self.find_activity(channel.id()) {
            return record;
        }
        let save_bodies = self.settings.read().save_request_and_response_bodies;
        let fresh = Arc::new(Mutex::new(HttpActivity::new(channel.clone(), save_bodies)));
        self.open_requests
            .entry(channel.id())
            .or_insert(fresh)
            .value()
            .clone()
    }

    fn find_activity(&self, id: ChannelId) -> Option<Record> {
        self.open_requests.get(&id).map(|entry| entry.value().clone())
    }

    fn throttler(&self) -> Result<Option<Arc<ThrottleManager>>, ObserverError> {
        let mut slot = self.throttle.lock();
        if let Some(manager) = &slot.manager {
            return Ok(Some(manager.clone()));
        }
        let Some(data) = self.settings.read().throttle.clone() else {
            return Ok(None);
        };
        let manager = Arc::new(ThrottleManager::new(data)?);
        slot.driver = manager.spawn_driver();
        slot.manager = Some(manager.clone());
        Ok(Some(manager))
    }

    fn observe_topic(self: &Arc<Self>, channel: &ChannelRef, topic: &str) {
        if self.is_destroyed() {
            return;
        }
        let topic = match topic.parse::<Topic>() {
            Ok(topic) => topic,
            Err(err) => {
                debug!(target: "network-observer", error = %err, "ignoring notification");
                return;
            }
        };
        debug!(target: "network-observer", channel = %channel.id(), topic = topic.as_str(), "topic");
        isolate(topic.as_str(), || match topic {
            Topic::ExamineResponse => self.on_examine_response(channel),
            Topic::ExamineCachedResponse => self.on_examine_cached_response(channel),
            Topic::ModifyRequest => self.on_modify_request(channel),
            Topic::BeforeConnect => self.on_before_connect(channel),
            Topic::StopRequest => self.on_stop_request(channel),
            Topic::FailedOpeningRequest => self.on_failed_opening_request(channel),
            Topic::ServiceWorkerSynthesizedResponse => self.on_service_worker_response(channel),
            Topic::FileChannelOpened | Topic::DataChannelOpened => self.on_file_channel_opened(channel),
        });
    }

    fn observe_activity(self: &Arc<Self>, channel: &ChannelRef, event: ActivityEvent) {
        if self.is_destroyed() || !event.activity_type.is_observed() {
            return;
        }
        if channel.kind() != ChannelKind::Http {
            return;
        }
        isolate("observe_activity", || {
            if event.subtype == ActivitySubtype::RequestHeader {
                return self.on_request_header(channel, &event);
            }
            let Some(record) = self.find_activity(channel.id()) else {
                return Ok(());
            };
            let throttle = if event.subtype.is_download() {
                record.lock().download_throttle.clone()
            } else {
                None
            };
            match throttle {
                // The throttle replays the event through the same dispatcher
                // once the bytes it describes were released.
                Some(throttle) => {
                    let weak = Arc::downgrade(self);
                    let id = channel.id();
                    let subtype = event.subtype;
                    let event = event.clone();
                    throttle.add_activity_callback(
                        subtype,
                        Box::new(move |timestamp| {
                            let Some(inner) = weak.upgrade() else {
                                return;
                            };
                            if inner.is_destroyed() {
                                return;
                            }
                            let Some(record) = inner.find_activity(id) else {
                                return;
                            };
                            let event = event.restamped(timestamp);
                            isolate("throttled_activity", || {
                                inner.dispatch_activity(&record, &event);
                                Ok(())
                            });
                        }),
                    );
                }
                None => self.dispatch_activity(&record, &event),
            }
            Ok(())
        });
    }

    fn on_request_header(&self, channel: &ChannelRef, event: &ActivityEvent) -> Result<(), ObserverError> {
        if self.ignored(channel) {
            return Ok(());
        }
        let record = self.create_or_get_activity(channel);
        let owner = {
            let mut activity = record.lock();
            if event.timestamp != 0 {
                activity.timings.set_request_header(event.timestamp);
            }
            activity.request_raw_headers = Some(event.extra_string.clone());
            activity.owner.clone()
        };
        if let Some(owner) = owner {
            owner.add_raw_headers(RawHeaders {
                raw_headers: event.extra_string.clone(),
            });
        }
        Ok(())
    }

    fn dispatch_activity(&self, record: &Record, event: &ActivityEvent) {
        let mut activity = record.lock();
        activity.timings.record(event.subtype, event.timestamp);
        debug!(
            target: "network-observer",
            channel = %activity.id,
            subtype = ?event.subtype,
            timestamp = event.timestamp,
            "activity"
        );
        match event.subtype {
            ActivitySubtype::RequestBodySent => {
                drop(activity);
                self.prepare_request_body(record);
                self.send_request_body(record);
            }
            ActivitySubtype::ResponseHeader => {
                activity.headers_size = event.extra_string.len() as u64;
                activity.response_raw_headers = Some(event.extra_string.clone());
            }
            ActivitySubtype::ProxyResponseHeader => {
                activity.proxy_response_raw_headers = Some(event.extra_string.clone());
            }
            ActivitySubtype::EarlyHintResponseHeader => {
                activity.headers_size = event.extra_string.len() as u64;
                activity.early_hints_response_raw_headers = Some(event.extra_string.clone());
            }
            ActivitySubtype::TransactionClose => {
                let Some(owner) = activity.owner.clone() else {
                    return;
                };
                let timings = har_timings(&activity.timings, activity.from_cache);
                let channel = activity.channel.clone();
                drop(activity);
                owner.add_server_timings(server_timings(&channel));
                owner.add_event_timings(timings.total, timings.timings, timings.offsets);
            }
            _ => {}
        }
    }

    fn on_before_connect(&self, channel: &ChannelRef) -> Result<(), ObserverError> {
        if self.ignored(channel) {
            return Ok(());
        }
        let record = self.create_or_get_activity(channel);
        if self.apply_override(channel) {
            let mut activity = record.lock();
            activity.from_cache = true;
            activity.is_overridden = true;
        }
        self.create_network_event(channel, &record, EventArgs::default())
    }

    fn apply_override(&self, channel: &ChannelRef) -> bool {
        let url = channel.url();
        let Some(path) = self.overrides.read().get(&url).map(Path::to_path_buf) else {
            return false;
        };
        let applied = load_override(&path).and_then(|content| {
            channel
                .set_override_content(content)
                .map_err(ObserverError::from)
        });
        match applied {
            Ok(()) => {
                debug!(target: "network-observer", %url, path = %path.display(), "response overridden");
                true
            }
            Err(err) => {
                warn!(target: "network-observer", %url, error = %err, "failed to override response");
                false
            }
        }
    }

    fn on_modify_request(&self, channel: &ChannelRef) -> Result<(), ObserverError> {
        if self.ignored(channel) {
            return Ok(());
        }
        // Read the body before an upload throttle starts consuming it.
        let record = self.create_or_get_activity(channel);
        self.prepare_request_body(&record);
        if let Some(throttler) = self.throttler()? {
            throttler.manage_upload(channel);
        }
        Ok(())
    }

    fn on_examine_response(&self, channel: &ChannelRef) -> Result<(), ObserverError> {
        if self.ignored(channel) {
            return Ok(());
        }
        let record = self.create_or_get_activity(channel);
        self.capture_response_status(&record, channel);
        self.add_response_start(&record, channel);
        Ok(())
    }

    fn on_service_worker_response(&self, channel: &ChannelRef) -> Result<(), ObserverError> {
        self.examine_cached_response(channel, true)
    }

    fn on_examine_cached_response(&self, channel: &ChannelRef) -> Result<(), ObserverError> {
        self.examine_cached_response(channel, false)
    }

    fn examine_cached_response(
        &self,
        channel: &ChannelRef,
        from_service_worker: bool,
    ) -> Result<(), ObserverError> {
        if self.ignored(channel) {
            return Ok(());
        }
        let record = self.create_or_get_activity(channel);
        self.capture_response_status(&record, channel);

        // Cached and service-worker responses skip before-connect, so this is
        // the first time they are seen.
        self.create_network_event(
            channel,
            &record,
            EventArgs {
                from_cache: !from_service_worker,
                from_service_worker,
                ..EventArgs::default()
            },
        )?;

        let Some(owner) = record.lock().owner.clone() else {
            return Ok(());
        };
        let details = {
            let activity = record.lock();
            CacheDetails {
                from_cache: activity.from_cache,
                from_service_worker: activity.from_service_worker,
            }
        };
        owner.add_cache_details(details);
        self.add_response_start(&record, channel);

        self.prepare_request_body(&record);
        self.send_request_body(&record);

        // No timing activity is ever fired for these.
        let (timings, from_service_worker) = {
            let activity = record.lock();
            (
                har_timings(&activity.timings, activity.from_cache),
                activity.from_service_worker,
            )
        };
        owner.add_server_timings(server_timings(channel));
        owner.add_service_worker_timings(service_worker_timings(
            channel.timed_info(),
            from_service_worker,
        ));
        owner.add_event_timings(timings.total, timings.timings, timings.offsets);
        Ok(())
    }

    fn on_stop_request(&self, channel: &ChannelRef) -> Result<(), ObserverError> {
        if self.ignored(channel) {
            return Ok(());
        }
        let record = self.create_or_get_activity(channel);
        let (has_owner, from_cache) = {
            let activity = record.lock();
            (activity.owner.is_some(), activity.from_cache)
        };
        if !has_owner {
            // Observation started after this request went out.
            let blocked = self.services.blocked_reasons.blocked_reason(channel, from_cache);
            let args = if blocked.is_blocked() {
                EventArgs {
                    blocked,
                    ..EventArgs::default()
                }
            } else {
                EventArgs {
                    in_progress: true,
                    ..EventArgs::default()
                }
            };
            self.create_network_event(channel, &record, args)?;
        }
        let owner = record.lock().owner.clone();
        if let Some(owner) = owner {
            owner.add_server_timings(server_timings(channel));
        }
        Ok(())
    }

    fn on_failed_opening_request(&self, channel: &ChannelRef) -> Result<(), ObserverError> {
        if self.ignored(channel) {
            return Ok(());
        }
        // A failed preload is retried as a regular request.
        if channel.is_preload() {
            return Ok(());
        }
        let record = self.create_or_get_activity(channel);
        let from_cache = record.lock().from_cache;
        let mut blocked = self.services.blocked_reasons.blocked_reason(channel, from_cache);
        blocked
            .blocked_reason
            .get_or_insert_with(|| BlockedReason::Error(channel.status().to_string()));
        self.create_network_event(
            channel,
            &record,
            EventArgs {
                blocked,
                ..EventArgs::default()
            },
        )
    }

    fn on_file_channel_opened(&self, channel: &ChannelRef) -> Result<(), ObserverError> {
        if self.ignored(channel) {
            return Ok(());
        }
        let record = self.create_or_get_activity(channel);
        self.create_network_event(
            channel,
            &record,
            EventArgs {
                is_file_channel: true,
                ..EventArgs::default()
            },
        )?;
        self.add_response_start(&record, channel);
        let owner = record.lock().owner.clone();
        if let Some(owner) = owner {
            owner.add_security_info(SecurityInfo::insecure());
        }
        Ok(())
    }

    /// The single place an owner is created. Every trigger ends up here and
    /// only the first one for a channel gets through.
    fn create_network_event(
        &self,
        channel: &ChannelRef,
        record: &Record,
        args: EventArgs,
    ) -> Result<(), ObserverError> {
        let (url, timestamp, raw_headers, already_cached, discard_request_body, discard_response_body) = {
            let mut activity = record.lock();
            if activity.reporting {
                return Ok(());
            }
            activity.reporting = true;
            (
                activity.url.clone(),
                activity
                    .timings
                    .get(ActivitySubtype::RequestHeader)
                    .map(|timing| timing.first),
                activity.request_raw_headers.clone(),
                activity.from_cache,
                activity.discard_request_body,
                activity.discard_response_body,
            )
        };

        let mut blocked = args.blocked;
        if blocked.blocked_reason.is_none() && self.blocked_urls.read().matches(&url) {
            channel.cancel(ChannelStatus::BindingAborted);
            blocked.blocked_reason = Some(BlockedReason::DevTools);
            debug!(target: "network-observer", channel = %channel.id(), %url, "request blocked");
        }

        let from_cache = already_cached || args.from_cache || args.from_service_worker;
        let init = NetworkEventInit {
            channel_id: channel.id(),
            url,
            method: channel.method(),
            timestamp,
            from_cache,
            from_service_worker: args.from_service_worker,
            raw_headers,
            blocked_reason: blocked.blocked_reason.clone(),
            blocking_extension: blocked.blocking_extension.clone(),
            discard_request_body,
            discard_response_body,
            in_progress_request: args.in_progress,
            is_file_channel: args.is_file_channel,
        };
        let claim = ReportingClaim::new(record);
        let owner = self
            .factory
            .on_network_event(init, channel, channel.is_proxied());

        let is_blocked = blocked.is_blocked();
        {
            let mut activity = record.lock();
            activity.owner = Some(owner.clone());
            activity.from_cache = from_cache;
            activity.from_service_worker = args.from_service_worker;
            activity.blocked_reason = blocked.blocked_reason;
            activity.blocking_extension = blocked.blocking_extension;
            activity.in_progress = args.in_progress;
        }
        claim.settle();
        debug!(
            target: "network-observer",
            channel = %channel.id(),
            from_cache,
            blocked = is_blocked,
            in_progress = args.in_progress,
            "network event created"
        );

        if self.settings.read().auth_prompt_listener {
            channel.set_auth_prompt_listener(NetworkAuthListener::new(channel.id(), owner));
        }

        // Blocked and in-progress requests have no body left to observe.
        if !is_blocked && !args.in_progress {
            if let Err(err) = self.setup_response_listener(channel, record, from_cache) {
                warn!(target: "network-observer", channel = %channel.id(), error = %err, "response body capture unavailable");
            }
        }

        self.send_request_body(record);
        Ok(())
    }

    fn setup_response_listener(
        &self,
        channel: &ChannelRef,
        record: &Record,
        from_cache: bool,
    ) -> Result<(), ObserverError> {
        if !from_cache && channel.kind() == ChannelKind::Http {
            if let Some(throttler) = self.throttler()? {
                let throttle = throttler.manage(channel)?;
                record.lock().download_throttle = throttle;
            }
        }

        let settings = {
            let config = self.settings.read();
            CaptureSettings {
                decode_response_bodies: config.decode_response_bodies,
                response_body_limit: config.response_body_limit,
            }
        };
        let sink = NetworkResponseListener::new(
            record.clone(),
            settings,
            self.services.blocked_reasons.clone(),
        );
        let tee = TeeListener::new(sink);
        let original = channel.set_new_listener(tee.clone())?;
        tee.set_original_listener(original);
        Ok(())
    }

    fn capture_response_status(&self, record: &Record, channel: &ChannelRef) {
        let status = channel.response_status();
        let mut activity = record.lock();
        if activity.response_status.is_none() {
            activity.response_status = status;
        }
    }

    fn add_response_start(&self, record: &Record, channel: &ChannelRef) {
        let status_text = channel.response_status_text();
        let (owner, start) = {
            let mut activity = record.lock();
            let Some(owner) = activity.owner.clone() else {
                return;
            };
            if activity.response_started {
                return;
            }
            activity.response_started = true;
            let start = ResponseStart {
                from_cache: activity.from_cache || activity.from_service_worker,
                from_service_worker: activity.from_service_worker,
                status: activity.response_status,
                status_text,
                raw_headers: activity.response_raw_headers.clone(),
                proxy_response_raw_headers: activity.proxy_response_raw_headers.clone(),
                early_hints_response_raw_headers: activity
                    .early_hints_response_raw_headers
                    .clone(),
            };
            (owner, start)
        };
        owner.add_response_start(start);
    }

    fn prepare_request_body(&self, record: &Record) {
        let (channel, charset) = {
            let activity = record.lock();
            if activity.discard_request_body
                || activity.sent_body.is_some()
                || activity.request_body_sent
            {
                return;
            }
            (activity.channel.clone(), activity.charset.clone())
        };
        let Some(bytes) = channel.upload_body() else {
            return;
        };
        let text = decode_text(&bytes, &charset);
        let mut activity = record.lock();
        if activity.sent_body.is_none() && !activity.request_body_sent {
            activity.sent_body = Some(text);
        }
    }

    fn send_request_body(&self, record: &Record) {
        let (owner, mut text) = {
            let mut activity = record.lock();
            let Some(owner) = activity.owner.clone() else {
                return;
            };
            let Some(text) = activity.sent_body.take() else {
                return;
            };
            activity.request_body_sent = true;
            (owner, text)
        };
        let size = text.chars().count() as u64;
        let limit = self.settings.read().request_body_limit;
        if limit > 0 && size > limit {
            if let Some((cut, _)) = text.char_indices().nth(limit as usize) {
                text.truncate(cut);
            }
        }
        owner.add_request_post_data(PostData { text, size });
    }
}
