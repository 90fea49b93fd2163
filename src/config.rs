//! Configuration for the `netmonitor` binary.
//!
//! The file is YAML (JSON is accepted too) and mirrors [`ObserverConfig`], plus
//! a throttling profile whose latencies may be written as humantime durations
//! (`"150ms"`, `"1s"`) and an initial blocklist. `NETMONITOR__*` environment
//! variables are applied last.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use network_observer::{ObserverConfig, ProcessKind, ThrottleData};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const ENV_PREFIX: &str = "NETMONITOR__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to deserialize config: {0}")]
    Deserialize(String),
    #[error("invalid duration {value:?}: {reason}")]
    Duration { value: String, reason: String },
    #[error("invalid value {value:?} for {key}")]
    Override { key: String, value: String },
    #[error("no configuration directory on this platform")]
    NoConfigDir,
}

/// A latency as written in the file: plain milliseconds or a humantime string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Latency {
    Millis(u64),
    Human(String),
}

impl Default for Latency {
    fn default() -> Self {
        Latency::Millis(0)
    }
}

impl Latency {
    pub fn as_millis(&self) -> Result<u64, ConfigError> {
        match self {
            Latency::Millis(ms) => Ok(*ms),
            Latency::Human(raw) => humantime::parse_duration(raw)
                .map(|duration: Duration| duration.as_millis() as u64)
                .map_err(|err| ConfigError::Duration {
                    value: raw.clone(),
                    reason: err.to_string(),
                }),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSection {
    pub latency_mean: Latency,
    pub latency_max: Latency,
    pub download_bps_mean: u64,
    pub download_bps_max: u64,
    pub upload_bps_mean: u64,
    pub upload_bps_max: u64,
}

impl ThrottleSection {
    pub fn to_data(&self) -> Result<ThrottleData, ConfigError> {
        Ok(ThrottleData {
            latency_mean: self.latency_mean.as_millis()?,
            latency_max: self.latency_max.as_millis()?,
            download_bps_mean: self.download_bps_mean,
            download_bps_max: self.download_bps_max,
            upload_bps_mean: self.upload_bps_mean,
            upload_bps_max: self.upload_bps_max,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub observer: ObserverConfig,
    pub throttle: Option<ThrottleSection>,
    pub blocked_urls: Vec<String>,
}

impl MonitorConfig {
    /// Observer settings with the file's throttling profile folded in.
    pub fn observer_config(&self) -> Result<ObserverConfig, ConfigError> {
        let mut config = self.observer.clone();
        if let Some(throttle) = &self.throttle {
            config.throttle = Some(throttle.to_data()?);
        }
        Ok(config)
    }

    /// Apply `NETMONITOR__*` pairs. Unknown keys are ignored.
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let observer = &mut self.observer;
            match name.to_ascii_uppercase().as_str() {
                "DECODE_RESPONSE_BODIES" => {
                    observer.decode_response_bodies = parse_flag(&key, &value)?
                }
                "RESPONSE_BODY_LIMIT" => observer.response_body_limit = parse_number(&key, &value)?,
                "REQUEST_BODY_LIMIT" => observer.request_body_limit = parse_number(&key, &value)?,
                "SAVE_BODIES" => {
                    observer.save_request_and_response_bodies = parse_flag(&key, &value)?
                }
                "AUTH_PROMPT_LISTENER" => observer.auth_prompt_listener = parse_flag(&key, &value)?,
                "PROCESS" => {
                    observer.process = match value.to_ascii_lowercase().as_str() {
                        "parent" => ProcessKind::Parent,
                        "content" => ProcessKind::Content,
                        _ => return Err(ConfigError::Override { key, value }),
                    }
                }
                "BLOCKED_URLS" => {
                    self.blocked_urls = value
                        .split(',')
                        .map(str::trim)
                        .filter(|pattern| !pattern.is_empty())
                        .map(str::to_owned)
                        .collect();
                }
                other => {
                    debug!(key = other, "ignoring unknown override");
                    continue;
                }
            }
            debug!(%key, "applied environment override");
        }
        Ok(())
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Override {
            key: key.to_owned(),
            value: value.to_owned(),
        }),
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Override {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    path.push("soulbrowser");
    path.push("netmonitor.yaml");
    Ok(path)
}

pub fn parse_config_str(raw: &str) -> Result<MonitorConfig, ConfigError> {
    match serde_yaml::from_str(raw) {
        Ok(config) => Ok(config),
        Err(yaml_err) => serde_json::from_str(raw).map_err(|json_err| {
            ConfigError::Deserialize(format!(
                "yaml error: {}; json error: {}",
                yaml_err, json_err
            ))
        }),
    }
}

pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<MonitorConfig, ConfigError> {
    let raw = fs::read_to_string(path.as_ref())?;
    parse_config_str(&raw)
}

/// Load the explicit file, else the default location if it exists, else the
/// defaults; then apply the process environment.
pub fn load_config(path: Option<&Path>) -> Result<MonitorConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let config = load_config_from_path(path)?;
            info!("Loaded configuration from: {}", path.display());
            config
        }
        None => match default_config_path() {
            Ok(path) if path.exists() => {
                let config = load_config_from_path(&path)?;
                info!("Loaded configuration from: {}", path.display());
                config
            }
            _ => {
                debug!("No configuration file, using defaults");
                MonitorConfig::default()
            }
        },
    };
    config.apply_overrides(env::vars())?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn yaml_with_humantime_latencies() {
        let raw = r#"
observer:
  response_body_limit: 2048
  auth_prompt_listener: true
throttle:
  latency_mean: 150ms
  latency_max: 1s
  download_bps_mean: 1000
blocked_urls:
  - "*tracker*"
"#;
        let config = parse_config_str(raw).unwrap();
        assert_eq!(config.blocked_urls, vec!["*tracker*".to_owned()]);
        let observer = config.observer_config().unwrap();
        assert_eq!(observer.response_body_limit, 2048);
        assert!(observer.auth_prompt_listener);
        assert!(observer.decode_response_bodies);
        let throttle = observer.throttle.unwrap();
        assert_eq!(throttle.latency_mean, 150);
        assert_eq!(throttle.latency_max, 1000);
        assert_eq!(throttle.download_bps_mean, 1000);
    }

    #[test]
    fn json_is_accepted() {
        let config =
            parse_config_str(r#"{"throttle": {"latency_mean": 20, "upload_bps_mean": 5}}"#).unwrap();
        let throttle = config.observer_config().unwrap().throttle.unwrap();
        assert_eq!(throttle.latency_mean, 20);
        assert_eq!(throttle.upload_bps_mean, 5);
    }

    #[test]
    fn bad_durations_are_reported() {
        let config = parse_config_str("throttle:\n  latency_mean: soon\n").unwrap();
        assert!(matches!(
            config.observer_config(),
            Err(ConfigError::Duration { .. })
        ));
    }

    #[test]
    fn environment_overrides_win() {
        let mut config = MonitorConfig::default();
        config
            .apply_overrides(vec![
                ("NETMONITOR__RESPONSE_BODY_LIMIT".to_owned(), "10".to_owned()),
                ("NETMONITOR__PROCESS".to_owned(), "content".to_owned()),
                ("NETMONITOR__BLOCKED_URLS".to_owned(), "a*, b*".to_owned()),
                ("NETMONITOR__SAVE_BODIES".to_owned(), "off".to_owned()),
                ("HOME".to_owned(), "/root".to_owned()),
            ])
            .unwrap();
        assert_eq!(config.observer.response_body_limit, 10);
        assert_eq!(config.observer.process, ProcessKind::Content);
        assert!(!config.observer.save_request_and_response_bodies);
        assert_eq!(config.blocked_urls, vec!["a*".to_owned(), "b*".to_owned()]);

        let err = config
            .apply_overrides(vec![("NETMONITOR__DECODE_RESPONSE_BODIES".to_owned(), "maybe".to_owned())])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Override { .. }));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            load_config(Some(missing.as_path())),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn files_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netmonitor.yaml");
        std::fs::write(&path, "observer:\n  request_body_limit: 7\n").unwrap();
        let config = load_config_from_path(&path).unwrap();
        assert_eq!(config.observer.request_body_limit, 7);
    }
}
