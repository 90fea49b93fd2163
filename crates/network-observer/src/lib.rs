//! Network observer for the SoulBrowser network monitor.
//!
//! The platform reports a request through many independent notifications:
//! activity callbacks from the HTTP transaction and its socket, and topics for
//! cache hits, service workers, failures and the end of the request. Any of
//! them may arrive first. [`NetworkObserver`] keeps one [`HttpActivity`] per
//! channel, decides when a request is worth reporting and then drives exactly
//! one [`NetworkEventOwner`] for it.
//!
//! Response bodies are captured through a [`TeeListener`] that leaves the page's
//! own listener untouched. Throttling, manual blocking, local overrides and
//! authentication prompts hook into the same lifecycle.

pub mod activity;
pub mod auth;
pub mod blocking;
pub mod config;
pub mod error;
pub mod infallible;
pub mod observer;
pub mod overrides;
pub mod owner;
pub mod response;
pub mod server_timing;
pub mod tee;
pub mod timings;

pub use activity::{HttpActivity, StageTiming, StageTimings};
pub use auth::NetworkAuthListener;
pub use blocking::{
    BlockFilter, BlockList, BlockedInfo, BlockedReason, BlockedReasonResolver,
    NetworkBlockedReasons,
};
pub use config::{ObserverConfig, ProcessKind};
pub use error::ObserverError;
pub use infallible::isolate;
pub use observer::{NetworkObserver, NetworkObserverBuilder, PlatformServices};
pub use owner::{
    CacheDetails, HarOffsets, HarTimings, NetworkEventFactory, NetworkEventInit,
    NetworkEventOwner, PostData, RawHeaders, ResponseContent, ResponseContentInfo,
    ResponseStart, SecurityInfo, ServiceWorkerTimings,
};
pub use response::NetworkResponseListener;
pub use server_timing::parse_server_timing;
pub use tee::TeeListener;
pub use timings::EventTimings;

pub use network_throttle::ThrottleData;
