//! Platform boundary for the SoulBrowser network monitor.
//!
//! Everything the observer consumes from the host lives here: channel handles,
//! stream listeners, the activity distributor and the topic service. Vendor
//! constants are decoded into enums at this boundary so the observer never
//! matches on magic numbers.

pub mod activity;
pub mod auth;
pub mod channel;
pub mod listener;
pub mod services;
pub mod status;
pub mod topic;

pub use activity::{ActivityEvent, ActivitySubtype, ActivityType};
pub use auth::{AuthPrompt, AuthPromptListener, AuthResponder};
pub use channel::{
    Channel, ChannelError, ChannelId, ChannelKind, ChannelRef, OverrideContent,
    ServerTimingEntry, TimedChannelInfo, UploadThrottle,
};
pub use listener::{StreamError, StreamListener};
pub use services::{
    ActivityDistributor, ActivityObserver, ObserverHandle, ObserverService, ResourceCache,
    TopicObserver,
};
pub use status::ChannelStatus;
pub use topic::{Topic, UnknownTopic};
