use std::path::{Path, PathBuf};

use network_observer::ThrottleData;
use serde::{Deserialize, Serialize};
use soulbrowser_core_types::{ActivitySubtype, Topic};
use soulbrowser_event_bus::ChannelSpec;

use super::ReplayError;

/// One line of a recorded notification script. Channels are referred to by a
/// label chosen at `open`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Open {
        channel: String,
        #[serde(default)]
        spec: ChannelSpec,
    },
    Topic {
        channel: String,
        topic: Topic,
    },
    Activity {
        channel: String,
        subtype: ActivitySubtype,
        /// Microseconds since the epoch.
        timestamp: i64,
        #[serde(default)]
        extra: String,
    },
    Start {
        channel: String,
    },
    Data {
        channel: String,
        body: String,
    },
    Stop {
        channel: String,
        /// Raw platform status, success when absent.
        #[serde(default)]
        status: Option<u32>,
    },
    /// Start, body and stop in one go; serves the override when one is installed.
    Respond {
        channel: String,
        #[serde(default)]
        body: String,
        #[serde(default = "default_chunk")]
        chunk: usize,
    },
    Block {
        pattern: String,
    },
    Unblock {
        pattern: String,
    },
    Override {
        url: String,
        path: PathBuf,
    },
    Throttle {
        #[serde(default)]
        profile: Option<ThrottleData>,
    },
    /// Let the download throttle catch up.
    Wait {
        millis: u64,
    },
}

fn default_chunk() -> usize {
    16 * 1024
}

pub fn parse_script(raw: &str) -> Result<Vec<Step>, ReplayError> {
    match serde_yaml::from_str(raw) {
        Ok(steps) => Ok(steps),
        Err(yaml_err) => serde_json::from_str(raw).map_err(|json_err| {
            ReplayError::Script(format!(
                "yaml error: {}; json error: {}",
                yaml_err, json_err
            ))
        }),
    }
}

pub fn load_script(path: impl AsRef<Path>) -> Result<Vec<Step>, ReplayError> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    parse_script(&raw)
}
