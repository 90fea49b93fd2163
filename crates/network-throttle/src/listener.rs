use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use soulbrowser_core_types::{ActivitySubtype, ChannelStatus, StreamError, StreamListener};
use tracing::warn;

use crate::queue::ThrottleQueue;

/// Deferred activity dispatch, invoked with the replay timestamp (microseconds).
pub type ActivityCallback = Box<dyn FnOnce(i64) + Send>;

enum Deferred {
    Waiting(ActivityCallback),
    Fired,
}

#[derive(Default)]
struct ThrottleState {
    pending: VecDeque<Vec<u8>>,
    offset: u64,
    response_started: bool,
    stop_requested: Option<ChannelStatus>,
    stopped: bool,
    activities: HashMap<ActivitySubtype, Deferred>,
}

pub(crate) struct SendOutcome {
    pub(crate) length: u64,
    pub(crate) done: bool,
}

/// Listener spliced in front of a channel's original listener that only
/// forwards bytes when the [`ThrottleQueue`] grants them.
pub struct DownloadThrottle {
    me: Weak<DownloadThrottle>,
    queue: Arc<ThrottleQueue>,
    original: OnceCell<Arc<dyn StreamListener>>,
    state: Mutex<ThrottleState>,
}

impl DownloadThrottle {
    pub fn new(queue: Arc<ThrottleQueue>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            queue,
            original: OnceCell::new(),
            state: Mutex::new(ThrottleState::default()),
        })
    }

    pub fn set_original_listener(&self, original: Arc<dyn StreamListener>) {
        if self.original.set(original).is_err() {
            warn!(target: "network-throttle", "original listener already set");
        }
    }

    /// Park an activity notification until the data it describes has been
    /// released to the original listener.
    ///
    /// Response start and header replay after the first released byte;
    /// response complete and transaction close after the stop was forwarded.
    pub fn add_activity_callback(&self, subtype: ActivitySubtype, callback: ActivityCallback) {
        self.state
            .lock()
            .activities
            .insert(subtype, Deferred::Waiting(callback));
        self.maybe_emit_events();
    }

    pub fn has_pending_data(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    pub fn buffered_bytes(&self) -> u64 {
        self.state
            .lock()
            .pending
            .iter()
            .map(|chunk| chunk.len() as u64)
            .sum()
    }

    pub(crate) fn send_some_data(&self, permitted: u64) -> SendOutcome {
        let (bytes, offset, done, stop) = {
            let mut state = self.state.lock();
            let Some(front) = state.pending.front_mut() else {
                return SendOutcome {
                    length: 0,
                    done: true,
                };
            };
            let take = (permitted as usize).min(front.len());
            let bytes: Vec<u8> = if take == front.len() {
                state.pending.pop_front().unwrap_or_default()
            } else {
                front.drain(..take).collect()
            };
            let offset = state.offset;
            state.offset += bytes.len() as u64;
            state.response_started = true;
            let done = state.pending.is_empty();
            let stop = if done && !state.stopped {
                state.stop_requested
            } else {
                None
            };
            if stop.is_some() {
                state.stopped = true;
            }
            (bytes, offset, done, stop)
        };

        let length = bytes.len() as u64;
        if let Some(original) = self.original.get() {
            if let Err(err) = original.on_data_available(&bytes, offset) {
                warn!(target: "network-throttle", ?err, "original listener rejected data");
            }
            if let Some(status) = stop {
                original.on_stop_request(status);
            }
        }
        self.maybe_emit_events();
        SendOutcome { length, done }
    }

    fn maybe_emit_events(&self) {
        let ready: Vec<ActivityCallback> = {
            let mut state = self.state.lock();
            let started = state.response_started || state.stopped;
            let stopped = state.stopped;
            let order = [
                (ActivitySubtype::ResponseStart, started),
                (ActivitySubtype::ResponseHeader, started),
                (ActivitySubtype::ResponseComplete, stopped),
                (ActivitySubtype::TransactionClose, stopped),
            ];
            let mut ready = Vec::new();
            for (subtype, eligible) in order {
                if !eligible {
                    continue;
                }
                let Some(entry) = state.activities.get_mut(&subtype) else {
                    continue;
                };
                if let Deferred::Waiting(callback) = std::mem::replace(entry, Deferred::Fired) {
                    ready.push(callback);
                }
            }
            ready
        };

        if ready.is_empty() {
            return;
        }
        let now = now_micros();
        for callback in ready {
            callback(now);
        }
    }

    fn me(&self) -> Option<Arc<DownloadThrottle>> {
        self.me.upgrade()
    }
}

impl StreamListener for DownloadThrottle {
    fn on_start_request(&self) -> Result<(), StreamError> {
        if let Some(original) = self.original.get() {
            original.on_start_request()?;
        }
        if let Some(me) = self.me() {
            self.queue.start(me, Instant::now());
        }
        Ok(())
    }

    fn on_data_available(&self, data: &[u8], _offset: u64) -> Result<(), StreamError> {
        let was_empty = {
            let mut state = self.state.lock();
            let was_empty = state.pending.is_empty();
            state.pending.push_back(data.to_vec());
            was_empty
        };
        if was_empty {
            if let Some(me) = self.me() {
                self.queue.data_available(me, Instant::now());
            }
        }
        Ok(())
    }

    fn on_stop_request(&self, status: ChannelStatus) {
        let forward = {
            let mut state = self.state.lock();
            state.stop_requested = Some(status);
            let forward = state.pending.is_empty() && !state.stopped;
            if forward {
                state.stopped = true;
            }
            forward
        };
        if forward {
            if let Some(original) = self.original.get() {
                original.on_stop_request(status);
            }
            self.maybe_emit_events();
        }
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as i64)
        .unwrap_or_default()
}
