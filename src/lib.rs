//! SoulBrowser network monitor.
//!
//! Library side of the `netmonitor` binary: configuration loading, replay of
//! recorded platform notifications through a [`network_observer::NetworkObserver`]
//! and the command implementations.

pub mod cli;
pub mod config;
pub mod replay;

pub use config::{load_config, ConfigError, MonitorConfig};
pub use replay::{replay, ReplayError, ReplayResults, Replayer, Step};
