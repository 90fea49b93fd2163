use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use network_observer::BlockList;

use crate::cli::output::{render_structured, OutputFormat};
use crate::config::{default_config_path, MonitorConfig};

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Print where the configuration is read from
    Path,

    /// Check throttling profile and block patterns
    Validate,
}

pub async fn cmd_config(
    args: ConfigArgs,
    config: &MonitorConfig,
    explicit: Option<&Path>,
    output: OutputFormat,
) -> Result<()> {
    match args.action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            let effective = config.observer_config().context("Invalid configuration")?;
            let view = MonitorConfig {
                observer: effective,
                throttle: None,
                blocked_urls: config.blocked_urls.clone(),
            };
            match render_structured(&view, output)? {
                Some(text) => println!("{text}"),
                None => println!("{}", serde_yaml::to_string(&view)?),
            }
        }
        ConfigAction::Path => match explicit {
            Some(path) => println!("{}", path.display()),
            None => println!("{}", default_config_path()?.display()),
        },
        ConfigAction::Validate => {
            validate(config)?;
            println!("configuration OK");
        }
    }
    Ok(())
}

pub fn validate(config: &MonitorConfig) -> Result<()> {
    let observer = config
        .observer_config()
        .context("Invalid throttle latency")?;
    if let Some(throttle) = &observer.throttle {
        throttle.validate().context("Invalid throttling profile")?;
    }
    BlockList::default()
        .replace(&config.blocked_urls)
        .context("Invalid block pattern")?;
    Ok(())
}
