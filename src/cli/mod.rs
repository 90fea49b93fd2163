pub mod config;
pub mod output;
pub mod replay;

pub use config::{cmd_config, ConfigAction, ConfigArgs};
pub use output::OutputFormat;
pub use replay::{cmd_replay, ReplayArgs};
