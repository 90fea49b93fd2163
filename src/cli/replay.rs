use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::cli::output::{render_structured, OutputFormat};
use crate::config::MonitorConfig;
use crate::replay::{load_script, replay, OwnerCall, ReplayRecord, ReplayResults};

#[derive(Args, Clone, Debug)]
pub struct ReplayArgs {
    /// Notification script (YAML or JSON)
    #[arg(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// Extra URL pattern to block, may be repeated
    #[arg(long = "block", value_name = "PATTERN")]
    pub block: Vec<String>,

    /// Response body bytes kept per request, 0 for unlimited
    #[arg(long)]
    pub response_body_limit: Option<u64>,

    /// Print only the totals
    #[arg(long)]
    pub summary: bool,
}

pub async fn cmd_replay(args: ReplayArgs, config: &MonitorConfig, output: OutputFormat) -> Result<()> {
    let steps = load_script(&args.script)
        .with_context(|| format!("Failed to load script {}", args.script.display()))?;
    let mut observer_config = config
        .observer_config()
        .context("Invalid observer configuration")?;
    if let Some(limit) = args.response_body_limit {
        observer_config.response_body_limit = limit;
    }
    let mut blocked = config.blocked_urls.clone();
    blocked.extend(args.block.iter().cloned());

    info!(script = %args.script.display(), steps = steps.len(), "replaying");
    let results = tokio::task::spawn_blocking(move || replay(&steps, observer_config, &blocked))
        .await
        .context("Replay task failed")??;

    if args.summary {
        let summary = serde_json::json!({
            "steps": results.steps,
            "networkEvents": results.network_events,
            "calls": results.records.len(),
        });
        match render_structured(&summary, output)? {
            Some(text) => println!("{text}"),
            None => println!("{}", summary_line(&results)),
        }
        return Ok(());
    }

    match render_structured(&results, output)? {
        Some(text) => println!("{text}"),
        None => {
            for record in &results.records {
                println!("{}", human_line(record));
            }
            println!("{}", summary_line(&results));
        }
    }
    Ok(())
}

fn summary_line(results: &ReplayResults) -> String {
    format!(
        "{} steps, {} network events, {} owner calls",
        results.steps,
        results.network_events,
        results.records.len()
    )
}

pub fn human_line(record: &ReplayRecord) -> String {
    let detail = match &record.call {
        OwnerCall::NetworkEvent { init, .. } => {
            let mut detail = format!("{} {}", init.method, init.url);
            if let Some(reason) = &init.blocked_reason {
                detail.push_str(&format!(" blocked={reason}"));
            }
            if init.from_cache {
                detail.push_str(" cached");
            }
            if init.in_progress_request {
                detail.push_str(" in-progress");
            }
            detail
        }
        OwnerCall::ResponseStart(start) => match start.status {
            Some(status) => format!("status={status}"),
            None => "status=-".to_owned(),
        },
        OwnerCall::RawHeaders(headers) => format!("{} bytes", headers.raw_headers.len()),
        OwnerCall::RequestPostData(post) => format!("{} chars", post.size),
        OwnerCall::CacheDetails(details) => format!(
            "from_cache={} from_service_worker={}",
            details.from_cache, details.from_service_worker
        ),
        OwnerCall::SecurityInfo(info) => info.state.clone(),
        OwnerCall::ServerTimings { timings } => timings
            .iter()
            .map(|entry| format!("{}={}ms", entry.name, entry.duration))
            .collect::<Vec<_>>()
            .join(" "),
        OwnerCall::ServiceWorkerTimings(timings) => format!(
            "launch={} request={} handled={}",
            timings.launch_service_worker,
            timings.request_to_service_worker,
            timings.handled_by_service_worker
        ),
        OwnerCall::EventTimings { total, timings, .. } => format!(
            "total={total}ms blocked={} dns={} connect={} ssl={} send={} wait={} receive={}",
            timings.blocked,
            timings.dns,
            timings.connect,
            timings.ssl,
            timings.send,
            timings.wait,
            timings.receive
        ),
        OwnerCall::ResponseContent { content, info } => {
            let mut detail = format!("{} {} bytes", content.mime_type, content.body_size);
            if info.truncated {
                detail.push_str(" truncated");
            }
            if let Some(encoding) = &content.encoding {
                detail.push_str(&format!(" encoding={encoding}"));
            }
            detail
        }
        OwnerCall::AuthPrompt(prompt) => format!("{} realm={}", prompt.scheme, prompt.realm),
    };
    format!("{:<12} {:<22} {}", record.channel, record.call.name(), detail)
}
