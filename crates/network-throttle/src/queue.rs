use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

use crate::listener::DownloadThrottle;

/// Interval at which a driver pumps the queue.
pub const TIMING_STEP: Duration = Duration::from_millis(100);

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Default)]
struct QueueState {
    /// Listeners still waiting out their simulated latency.
    parked: Vec<(Instant, Arc<DownloadThrottle>)>,
    /// Listeners with buffered data, served in FIFO order.
    downloads: VecDeque<Arc<DownloadThrottle>>,
    /// Bytes released during the last second.
    reads: VecDeque<(Instant, u64)>,
}

/// Shared download budget for every throttled channel of a profile.
pub struct ThrottleQueue {
    mean_bps: u64,
    max_bps: u64,
    latency_mean: Duration,
    latency_max: Duration,
    state: Mutex<QueueState>,
    pumping: AtomicBool,
}

impl ThrottleQueue {
    pub fn new(mean_bps: u64, max_bps: u64, latency_mean: Duration, latency_max: Duration) -> Self {
        Self {
            mean_bps,
            max_bps,
            latency_mean,
            latency_max,
            state: Mutex::new(QueueState::default()),
            pumping: AtomicBool::new(false),
        }
    }

    /// A throttled response started; hold its data back for a random latency.
    pub fn start(&self, listener: Arc<DownloadThrottle>, now: Instant) {
        let delay = random_duration(self.latency_mean, self.latency_max);
        if delay.is_zero() {
            self.allow_data_from(listener, now);
        } else {
            self.state.lock().parked.push((now + delay, listener));
        }
    }

    /// The listener went from an empty to a non-empty buffer.
    pub fn data_available(&self, listener: Arc<DownloadThrottle>, now: Instant) {
        {
            let mut state = self.state.lock();
            let parked = state
                .parked
                .iter()
                .any(|(_, parked)| Arc::ptr_eq(parked, &listener));
            if parked {
                return;
            }
            let queued = state
                .downloads
                .iter()
                .any(|queued| Arc::ptr_eq(queued, &listener));
            if !queued {
                state.downloads.push_back(listener);
            }
        }
        self.pump(now);
    }

    fn allow_data_from(&self, listener: Arc<DownloadThrottle>, now: Instant) {
        if listener.has_pending_data() {
            self.state.lock().downloads.push_back(listener);
        }
        self.pump(now);
    }

    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.parked.is_empty() && state.downloads.is_empty()
    }

    /// Release parked listeners whose latency elapsed and hand out this slice's
    /// byte budget.
    pub fn pump(&self, now: Instant) {
        // A redirect can put two throttles on one listener chain, which lands
        // back here from inside send_some_data.
        if self.pumping.swap(true, Ordering::AcqRel) {
            return;
        }
        let _pumping = PumpGuard(&self.pumping);

        let mut budget = {
            let mut state = self.state.lock();
            let (ready, parked): (Vec<_>, Vec<_>) = std::mem::take(&mut state.parked)
                .into_iter()
                .partition(|(deadline, _)| *deadline <= now);
            state.parked = parked;
            for (_, listener) in ready {
                if listener.has_pending_data() {
                    state.downloads.push_back(listener);
                }
            }

            while let Some((when, _)) = state.reads.front() {
                if now.saturating_duration_since(*when) > WINDOW {
                    state.reads.pop_front();
                } else {
                    break;
                }
            }
            let spent: u64 = state.reads.iter().map(|(_, bytes)| bytes).sum();
            random_between(self.mean_bps, self.max_bps).saturating_sub(spent)
        };

        while budget > 0 {
            let Some(listener) = self.state.lock().downloads.front().cloned() else {
                break;
            };
            let sent = listener.send_some_data(budget);
            let mut state = self.state.lock();
            if sent.done {
                state.downloads.pop_front();
            }
            if sent.length > 0 {
                state.reads.push_back((now, sent.length));
            } else if !sent.done {
                break;
            }
            budget = budget.saturating_sub(sent.length);
        }
    }
}

/// Clears the pump flag on every exit, unwinding included.
struct PumpGuard<'a>(&'a AtomicBool);

impl Drop for PumpGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn random_between(low: u64, high: u64) -> u64 {
    if high <= low {
        low
    } else {
        rand::thread_rng().gen_range(low..=high)
    }
}

fn random_duration(low: Duration, high: Duration) -> Duration {
    let millis = random_between(low.as_millis() as u64, high.as_millis() as u64);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_between_is_bounded() {
        for _ in 0..64 {
            let value = random_between(10, 20);
            assert!((10..=20).contains(&value));
        }
        assert_eq!(random_between(30, 5), 30);
    }

    #[test]
    fn empty_queue_is_idle_after_pump() {
        let queue = ThrottleQueue::new(100, 100, Duration::ZERO, Duration::ZERO);
        queue.pump(Instant::now());
        assert!(queue.is_idle());
    }
}
