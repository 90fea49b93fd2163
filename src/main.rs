use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use soulbrowser_netmonitor::cli::{cmd_config, cmd_replay, ConfigArgs, OutputFormat, ReplayArgs};
use soulbrowser_netmonitor::config::load_config;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// SoulBrowser network monitor
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Enable debug mode
    #[arg(short, long, global = true)]
    debug: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human", global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a recorded notification script through the observer
    Replay(ReplayArgs),

    /// Inspect the configuration
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.debug)?;
    info!("Starting netmonitor v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    let result = match cli.command {
        Commands::Replay(args) => cmd_replay(args, &config, cli.output).await,
        Commands::Config(args) => {
            cmd_config(args, &config, cli.config.as_deref(), cli.output).await
        }
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Command failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
