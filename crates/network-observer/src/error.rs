use std::path::PathBuf;

use network_throttle::ThrottleError;
use soulbrowser_core_types::ChannelError;
use thiserror::Error;

/// Errors surfaced by the network observer.
///
/// Only the builder and the throttle setter hand these back to callers;
/// everything raised inside a platform notification handler is logged by
/// [`crate::isolate`] and dropped.
#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("ignore_channel callback is required")]
    MissingIgnoreChannel,
    #[error("on_network_event factory is required")]
    MissingNetworkEventFactory,
    #[error("platform services are required")]
    MissingServices,
    #[error("observer has been destroyed")]
    Destroyed,
    #[error("invalid block pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to read override {path:?}: {source}")]
    OverrideRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Throttle(#[from] ThrottleError),
}
