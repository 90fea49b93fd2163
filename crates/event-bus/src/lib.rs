//! In-memory stand-ins for the platform services the network observer plugs
//! into.
//!
//! [`ActivityBus`] and [`TopicBus`] fan notifications out synchronously, the way
//! the platform does, and mirror every notification onto a broadcast channel
//! so tooling can watch the traffic. [`SimChannel`] is a scripted channel with a
//! real listener chain.

pub mod bus;
pub mod channel;

pub use bus::{to_mpsc, ActivityBus, PlatformEvent, RecordingResourceCache, TopicBus};
pub use channel::{ChannelSpec, RecordedAuth, RecordingListener, SimChannel};

use std::sync::Arc;

use tokio::sync::broadcast;

/// One simulated host: both buses, a resource cache and a shared trace.
#[derive(Clone)]
pub struct SimPlatform {
    pub activity: Arc<ActivityBus>,
    pub topics: Arc<TopicBus>,
    pub cache: Arc<RecordingResourceCache>,
    trace: broadcast::Sender<PlatformEvent>,
}

impl SimPlatform {
    pub fn new(capacity: usize) -> Self {
        let (trace, _) = broadcast::channel(capacity.max(1));
        Self {
            activity: Arc::new(ActivityBus::with_trace(trace.clone())),
            topics: Arc::new(TopicBus::with_trace(trace.clone())),
            cache: Arc::new(RecordingResourceCache::default()),
            trace,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.trace.subscribe()
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new(256)
    }
}
