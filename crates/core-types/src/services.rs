use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelRef;

/// Registration token returned by the platform services.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ObserverHandle(pub u64);

/// Receives raw HTTP activity callbacks.
pub trait ActivityObserver: Send + Sync {
    fn observe_activity(
        &self,
        channel: &ChannelRef,
        activity_type: u32,
        activity_subtype: u32,
        timestamp: i64,
        extra_size: u64,
        extra_string: &str,
    );
}

pub trait ActivityDistributor: Send + Sync {
    fn add_observer(&self, observer: Arc<dyn ActivityObserver>) -> ObserverHandle;

    fn remove_observer(&self, handle: ObserverHandle) -> bool;
}

/// Receives out-of-band notifications published under a topic name.
pub trait TopicObserver: Send + Sync {
    fn observe(&self, subject: &ChannelRef, topic: &str, data: Option<&str>);
}

pub trait ObserverService: Send + Sync {
    fn add_observer(&self, topic: &str, observer: Arc<dyn TopicObserver>) -> ObserverHandle;

    fn remove_observer(&self, handle: ObserverHandle) -> bool;
}

/// In-memory resource cache that can mask a freshly installed override.
pub trait ResourceCache: Send + Sync {
    fn invalidate(&self, url: &str);
}
