//! Replay of recorded platform notifications.
//!
//! A script drives a [`SimPlatform`] step by step; the observer under test sees
//! exactly what it would see from the network stack and every owner call is
//! logged for printing.

mod owner;
mod script;

pub use owner::{CallLog, LoggingOwner, OwnerCall, ReplayRecord};
pub use script::{load_script, parse_script, Step};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use network_observer::{
    BlockFilter, NetworkEventInit, NetworkEventOwner, NetworkObserver, ObserverConfig,
    ObserverError, PlatformServices,
};
use serde::Serialize;
use soulbrowser_core_types::{ActivityType, Channel, ChannelRef, ChannelStatus, StreamError};
use soulbrowser_event_bus::{SimChannel, SimPlatform};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid script: {0}")]
    Script(String),
    #[error("step {index}: unknown channel {label:?}")]
    UnknownChannel { index: usize, label: String },
    #[error("step {index}: channel {label:?} already opened")]
    DuplicateChannel { index: usize, label: String },
    #[error("step {index}: {source}")]
    Observer {
        index: usize,
        #[source]
        source: ObserverError,
    },
    #[error("step {index}: stream error: {source}")]
    Stream {
        index: usize,
        #[source]
        source: StreamError,
    },
    #[error(transparent)]
    Build(#[from] ObserverError),
}

#[derive(Debug, Serialize)]
pub struct ReplayResults {
    pub steps: usize,
    pub network_events: usize,
    pub records: Vec<ReplayRecord>,
}

pub struct Replayer {
    platform: SimPlatform,
    observer: NetworkObserver,
    channels: HashMap<String, Arc<SimChannel>>,
    log: CallLog,
    steps: usize,
}

impl Replayer {
    pub fn new(config: ObserverConfig, blocked_urls: &[String]) -> Result<Self, ReplayError> {
        let platform = SimPlatform::default();
        let log = CallLog::default();
        let factory_log = log.clone();
        let services = PlatformServices::new(platform.activity.clone(), platform.topics.clone())
            .with_resource_cache(platform.cache.clone());
        let observer = NetworkObserver::builder()
            .ignore_channel(|_: &ChannelRef| false)
            .on_network_event(
                move |init: NetworkEventInit, channel: &ChannelRef, is_proxy: bool| {
                    let id = channel.id();
                    factory_log.push(id, OwnerCall::NetworkEvent { init, is_proxy });
                    Arc::new(LoggingOwner::new(id, factory_log.clone()))
                        as Arc<dyn NetworkEventOwner>
                },
            )
            .config(config)
            .services(services)
            .build()?;
        if !blocked_urls.is_empty() {
            observer.set_blocked_urls(blocked_urls)?;
        }
        Ok(Self {
            platform,
            observer,
            channels: HashMap::new(),
            log,
            steps: 0,
        })
    }

    pub fn observer(&self) -> &NetworkObserver {
        &self.observer
    }

    pub fn run(&mut self, steps: &[Step]) -> Result<(), ReplayError> {
        for step in steps {
            self.apply(step)?;
        }
        Ok(())
    }

    pub fn apply(&mut self, step: &Step) -> Result<(), ReplayError> {
        let index = self.steps;
        self.steps += 1;
        debug!(index, ?step, "replay step");
        let stream = |source: StreamError| ReplayError::Stream { index, source };
        let observer_err = |source: ObserverError| ReplayError::Observer { index, source };

        match step {
            Step::Open { channel, spec } => {
                if self.channels.contains_key(channel) {
                    return Err(ReplayError::DuplicateChannel {
                        index,
                        label: channel.clone(),
                    });
                }
                let sim = SimChannel::new(spec.clone());
                self.log.label(sim.id(), channel);
                self.channels.insert(channel.clone(), sim);
            }
            Step::Topic { channel, topic } => {
                let subject: ChannelRef = self.channel(index, channel)?;
                self.platform.topics.notify_topic(&subject, *topic);
            }
            Step::Activity {
                channel,
                subtype,
                timestamp,
                extra,
            } => {
                let subject: ChannelRef = self.channel(index, channel)?;
                self.platform.activity.publish(
                    &subject,
                    ActivityType::HTTP_TRANSACTION,
                    subtype.raw(),
                    *timestamp,
                    extra.len() as u64,
                    extra,
                );
            }
            Step::Start { channel } => {
                self.channel(index, channel)?.start().map_err(stream)?;
            }
            Step::Data { channel, body } => {
                self.channel(index, channel)?
                    .data(body.as_bytes())
                    .map_err(stream)?;
            }
            Step::Stop { channel, status } => {
                let sim = self.channel(index, channel)?;
                if let Some(raw) = status {
                    sim.set_status(ChannelStatus::from_raw(*raw));
                }
                sim.stop();
            }
            Step::Respond {
                channel,
                body,
                chunk,
            } => {
                let sim = self.channel(index, channel)?;
                if !sim.respond_with_override().map_err(stream)? {
                    sim.respond(body.as_bytes(), *chunk).map_err(stream)?;
                }
            }
            Step::Block { pattern } => {
                self.observer
                    .block_request(&BlockFilter::new(pattern.clone()))
                    .map_err(observer_err)?;
            }
            Step::Unblock { pattern } => {
                self.observer
                    .unblock_request(&BlockFilter::new(pattern.clone()));
            }
            Step::Override { url, path } => {
                self.observer.override_url(url, path.clone());
            }
            Step::Throttle { profile } => {
                self.observer
                    .set_throttle_data(profile.clone())
                    .map_err(observer_err)?;
            }
            Step::Wait { millis } => {
                std::thread::sleep(Duration::from_millis(*millis));
                if let Some(manager) = self.observer.throttle_manager() {
                    manager.pump(Instant::now());
                }
            }
        }
        Ok(())
    }

    fn channel(&self, index: usize, label: &str) -> Result<Arc<SimChannel>, ReplayError> {
        self.channels
            .get(label)
            .cloned()
            .ok_or_else(|| ReplayError::UnknownChannel {
                index,
                label: label.to_owned(),
            })
    }

    pub fn records(&self) -> Vec<ReplayRecord> {
        self.log.records()
    }

    /// Destroy the observer and hand back everything that was logged.
    pub fn finish(self) -> ReplayResults {
        self.observer.destroy();
        let records = self.log.records();
        let network_events = records
            .iter()
            .filter(|record| matches!(record.call, OwnerCall::NetworkEvent { .. }))
            .count();
        info!(
            steps = self.steps,
            network_events,
            calls = records.len(),
            "replay finished"
        );
        ReplayResults {
            steps: self.steps,
            network_events,
            records,
        }
    }
}

/// Parse and run a whole script.
pub fn replay(
    steps: &[Step],
    config: ObserverConfig,
    blocked_urls: &[String],
) -> Result<ReplayResults, ReplayError> {
    let mut replayer = Replayer::new(config, blocked_urls)?;
    replayer.run(steps)?;
    Ok(replayer.finish())
}
