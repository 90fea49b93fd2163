use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use soulbrowser_core_types::{
    ActivityDistributor, ActivityEvent, ActivityObserver, ChannelId, ChannelRef, ObserverHandle,
    ObserverService, ResourceCache, Topic, TopicObserver,
};
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

/// A notification as it went out on one of the buses.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlatformEvent {
    Activity {
        channel: ChannelId,
        activity_type: u32,
        activity_subtype: u32,
        timestamp: i64,
    },
    Topic {
        channel: ChannelId,
        topic: String,
    },
}

fn next_handle(counter: &AtomicU64) -> ObserverHandle {
    ObserverHandle(counter.fetch_add(1, Ordering::Relaxed) + 1)
}

/// Synchronous activity distributor.
#[derive(Default)]
pub struct ActivityBus {
    observers: RwLock<Vec<(ObserverHandle, Arc<dyn ActivityObserver>)>>,
    next: AtomicU64,
    removals: AtomicUsize,
    trace: Option<broadcast::Sender<PlatformEvent>>,
}

impl ActivityBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace(trace: broadcast::Sender<PlatformEvent>) -> Self {
        Self {
            trace: Some(trace),
            ..Self::default()
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Successful `remove_observer` calls so far.
    pub fn removal_count(&self) -> usize {
        self.removals.load(Ordering::Relaxed)
    }

    pub fn publish(
        &self,
        channel: &ChannelRef,
        activity_type: u32,
        activity_subtype: u32,
        timestamp: i64,
        extra_size: u64,
        extra_string: &str,
    ) {
        if let Some(sender) = &self.trace {
            // Nobody listening is fine.
            let _ = sender.send(PlatformEvent::Activity {
                channel: channel.id(),
                activity_type,
                activity_subtype,
                timestamp,
            });
        }
        // Observers may unregister from inside the callback.
        let observers: Vec<_> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        trace!(channel = %channel.id(), activity_subtype, observers = observers.len(), "activity");
        for observer in observers {
            observer.observe_activity(
                channel,
                activity_type,
                activity_subtype,
                timestamp,
                extra_size,
                extra_string,
            );
        }
    }

    pub fn publish_event(&self, channel: &ChannelRef, event: &ActivityEvent) {
        self.publish(
            channel,
            event.activity_type.raw(),
            event.subtype.raw(),
            event.timestamp,
            event.extra_size,
            &event.extra_string,
        );
    }
}

impl ActivityDistributor for ActivityBus {
    fn add_observer(&self, observer: Arc<dyn ActivityObserver>) -> ObserverHandle {
        let handle = next_handle(&self.next);
        self.observers.write().push((handle, observer));
        handle
    }

    fn remove_observer(&self, handle: ObserverHandle) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != handle);
        let removed = observers.len() != before;
        if removed {
            self.removals.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }
}

/// Synchronous observer service keyed by topic name.
#[derive(Default)]
pub struct TopicBus {
    observers: RwLock<Vec<(ObserverHandle, String, Arc<dyn TopicObserver>)>>,
    next: AtomicU64,
    removals: AtomicUsize,
    trace: Option<broadcast::Sender<PlatformEvent>>,
}

impl TopicBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace(trace: broadcast::Sender<PlatformEvent>) -> Self {
        Self {
            trace: Some(trace),
            ..Self::default()
        }
    }

    /// Topics with at least one observer, sorted.
    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .observers
            .read()
            .iter()
            .map(|(_, topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    pub fn removal_count(&self) -> usize {
        self.removals.load(Ordering::Relaxed)
    }

    pub fn notify(&self, subject: &ChannelRef, topic: &str, data: Option<&str>) {
        if let Some(sender) = &self.trace {
            let _ = sender.send(PlatformEvent::Topic {
                channel: subject.id(),
                topic: topic.to_owned(),
            });
        }
        let observers: Vec<_> = self
            .observers
            .read()
            .iter()
            .filter(|(_, registered, _)| registered == topic)
            .map(|(_, _, observer)| observer.clone())
            .collect();
        trace!(channel = %subject.id(), topic, observers = observers.len(), "topic");
        for observer in observers {
            observer.observe(subject, topic, data);
        }
    }

    pub fn notify_topic(&self, subject: &ChannelRef, topic: Topic) {
        self.notify(subject, topic.as_str(), None);
    }
}

impl ObserverService for TopicBus {
    fn add_observer(&self, topic: &str, observer: Arc<dyn TopicObserver>) -> ObserverHandle {
        let handle = next_handle(&self.next);
        self.observers
            .write()
            .push((handle, topic.to_owned(), observer));
        handle
    }

    fn remove_observer(&self, handle: ObserverHandle) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _, _)| *existing != handle);
        let removed = observers.len() != before;
        if removed {
            self.removals.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }
}

/// Resource cache that only remembers which URLs were invalidated.
#[derive(Default)]
pub struct RecordingResourceCache {
    invalidated: Mutex<Vec<String>>,
}

impl RecordingResourceCache {
    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().clone()
    }
}

impl ResourceCache for RecordingResourceCache {
    fn invalidate(&self, url: &str) {
        self.invalidated.lock().push(url.to_owned());
    }
}

/// Forward a trace subscription into an mpsc receiver so callers can await
/// notifications without handling broadcast lag themselves.
pub fn to_mpsc(
    mut rx: broadcast::Receiver<PlatformEvent>,
    capacity: usize,
) -> mpsc::Receiver<PlatformEvent> {
    let (tx, out_rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    out_rx
}
