//! Network throttling for the SoulBrowser network monitor.
//!
//! A [`ThrottleManager`] shapes downloads by splicing a [`DownloadThrottle`]
//! into a channel's listener chain and shapes uploads by handing the channel an
//! [`UploadThrottle`]. The download side is a plain scheduler: bytes are held in
//! the throttle and released by [`ThrottleQueue::pump`], and activity callbacks
//! parked on the throttle are replayed once the bytes they describe went out.

pub mod listener;
pub mod queue;

pub use listener::{ActivityCallback, DownloadThrottle};
pub use queue::{ThrottleQueue, TIMING_STEP};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use soulbrowser_core_types::{ChannelError, ChannelRef, UploadThrottle};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Throttling profile, as exchanged with the network panel.
///
/// Latencies are milliseconds, rates are bytes per second. A zero mean disables
/// the corresponding direction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThrottleData {
    pub latency_mean: u64,
    pub latency_max: u64,
    #[serde(rename = "downloadBPSMean")]
    pub download_bps_mean: u64,
    #[serde(rename = "downloadBPSMax")]
    pub download_bps_max: u64,
    #[serde(rename = "uploadBPSMean")]
    pub upload_bps_mean: u64,
    #[serde(rename = "uploadBPSMax")]
    pub upload_bps_max: u64,
}

impl ThrottleData {
    pub fn validate(&self) -> Result<(), ThrottleError> {
        let pairs = [
            ("latency", self.latency_mean, self.latency_max),
            ("download", self.download_bps_mean, self.download_bps_max),
            ("upload", self.upload_bps_mean, self.upload_bps_max),
        ];
        for (field, mean, max) in pairs {
            if max != 0 && mean > max {
                return Err(ThrottleError::InvalidRange { field, mean, max });
            }
        }
        Ok(())
    }

    fn upload(&self) -> Option<UploadThrottle> {
        (self.upload_bps_mean > 0).then(|| UploadThrottle {
            mean_bps: self.upload_bps_mean,
            max_bps: self.upload_bps_max.max(self.upload_bps_mean),
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ThrottleError {
    #[error("{field} mean {mean} exceeds max {max}")]
    InvalidRange {
        field: &'static str,
        mean: u64,
        max: u64,
    },
    #[error("channel refused throttle: {0}")]
    Channel(#[from] ChannelError),
}

/// Owns the download queue and upload settings for one throttling profile.
pub struct ThrottleManager {
    data: ThrottleData,
    download: Option<Arc<ThrottleQueue>>,
    upload: Option<UploadThrottle>,
}

impl ThrottleManager {
    pub fn new(data: ThrottleData) -> Result<Self, ThrottleError> {
        data.validate()?;
        let download = (data.download_bps_mean > 0).then(|| {
            Arc::new(ThrottleQueue::new(
                data.download_bps_mean,
                data.download_bps_max.max(data.download_bps_mean),
                Duration::from_millis(data.latency_mean),
                Duration::from_millis(data.latency_max.max(data.latency_mean)),
            ))
        });
        let upload = data.upload();
        Ok(Self {
            data,
            download,
            upload,
        })
    }

    pub fn data(&self) -> &ThrottleData {
        &self.data
    }

    pub fn download_queue(&self) -> Option<Arc<ThrottleQueue>> {
        self.download.clone()
    }

    /// Put the channel's response behind the download queue.
    ///
    /// Returns `None` when downloads are not throttled.
    pub fn manage(&self, channel: &ChannelRef) -> Result<Option<Arc<DownloadThrottle>>, ThrottleError> {
        let Some(queue) = &self.download else {
            return Ok(None);
        };
        let throttle = DownloadThrottle::new(Arc::clone(queue));
        let original = channel.set_new_listener(throttle.clone())?;
        throttle.set_original_listener(original);
        debug!(target: "network-throttle", channel = %channel.id(), "download throttled");
        Ok(Some(throttle))
    }

    pub fn manage_upload(&self, channel: &ChannelRef) {
        if let Some(upload) = self.upload {
            channel.set_upload_throttle(upload);
        }
    }

    pub fn pump(&self, now: Instant) {
        if let Some(queue) = &self.download {
            queue.pump(now);
        }
    }

    /// Spawn a task pumping the download queue every [`TIMING_STEP`].
    ///
    /// Returns `None` when downloads are not throttled or no tokio runtime is
    /// available; the embedder then pumps manually.
    pub fn spawn_driver(self: &Arc<Self>) -> Option<DriverHandle> {
        let queue = self.download.clone()?;
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let cancel = CancellationToken::new();
        let loop_token = cancel.clone();
        let task = runtime.spawn(async move {
            let mut ticker = interval(TIMING_STEP);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        queue.pump(Instant::now());
                    }
                }
            }
        });
        Some(DriverHandle {
            cancel,
            task: Some(task),
        })
    }
}

/// Handle returned by [`ThrottleManager::spawn_driver`].
pub struct DriverHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DriverHandle {
    pub async fn shutdown(mut self) -> Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(_) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(err) => Err(err),
            }
        } else {
            Ok(())
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
