// runner.rs
use anyhow::{anyhow, Context, Result};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use honeysift_common::{DetectionLog, EngineConfig, ScanOptions};
use honeysift_orchestrator::{DetectionOrchestrator, JsonLinesLog, TracingLog};

use crate::args::DetectArgs;
use crate::output::print_report;
use crate::signatures;

pub async fn run_detect(args: DetectArgs) -> Result<()> {
    let config = build_config(&args)?;
    let database = signatures::load(&args.signatures)?;
    let host = resolve_target(&args.target).await?;

    info!("Starting detection...");
    info!("Target: {} ({})", args.target, host);
    info!("Ports: {}-{}", config.scan.first_port, config.scan.last_port);
    info!("Concurrency: {}", config.scan.concurrency);
    if let Some(rate) = config.scan.rate_limit {
        info!("Rate limit: {}/s", rate);
    }

    let log: Arc<dyn DetectionLog> = match &args.log_file {
        Some(path) => Arc::new(JsonLinesLog::open(path).await?),
        None => Arc::new(TracingLog),
    };

    let orchestrator = DetectionOrchestrator::new(&config, database.sets, log.clone())?
        .with_versions(database.versions);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing with partial results");
            interrupt.cancel();
        }
    });

    let report = orchestrator.scan(host, &cancel).await;
    if let Err(e) = log.close().await {
        warn!("Failed to close detection log: {:#}", e);
    }
    let report = report?;

    print_report(&report, &args.output_format)?;
    Ok(())
}

/// Config file (or defaults), then preset, then individual flags.
fn build_config(args: &DetectArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };

    match args.preset.as_deref() {
        Some("fast") => config.scan = ScanOptions::fast(),
        Some("thorough") => config.scan = ScanOptions::thorough(),
        Some(other) => return Err(anyhow!("Unknown preset '{}'", other)),
        None => {}
    }

    if let Some(ports) = &args.ports {
        let (first, last) = parse_port_range(ports)?;
        config.scan.first_port = first;
        config.scan.last_port = last;
    }
    if let Some(concurrency) = args.concurrency {
        config.scan.concurrency = concurrency;
    }
    if let Some(rate) = args.rate_limit {
        config.scan.rate_limit = Some(rate);
    }
    if let Some(timeout) = args.timeout {
        config.scan.connect_timeout_ms = timeout;
        config.communicator.connect_timeout_ms = timeout;
    }
    if let Some(threshold) = args.threshold {
        config.scoring.threshold = threshold;
    }
    if let Some(username) = &args.username {
        config.communicator.default_credentials.username = username.clone();
    }
    if let Some(password) = &args.password {
        config.communicator.default_credentials.password = password.clone();
    }

    config.validate()?;
    Ok(config)
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

/// Resolves an IP literal or hostname to the first address found.
async fn resolve_target(target: &str) -> Result<IpAddr> {
    let target = target.trim();
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((target, 0))
        .await
        .with_context(|| format!("resolving {}", target))?
        .map(|addr| addr.ip())
        .next()
        .ok_or_else(|| anyhow!("No address found for {}", target))
}

/// Parses "80" or "1-1024" into an inclusive port range
fn parse_port_range(ports_str: &str) -> Result<(u16, u16)> {
    let part = ports_str.trim();
    if part.is_empty() {
        return Err(anyhow!("No ports specified"));
    }

    let (start, end) = match part.split_once('-') {
        Some((start, end)) => {
            let start: u16 = start
                .trim()
                .parse()
                .context(format!("Invalid start port: {}", start))?;
            let end: u16 = end
                .trim()
                .parse()
                .context(format!("Invalid end port: {}", end))?;
            (start, end)
        }
        None => {
            let port: u16 = part.parse().context(format!("Invalid port: {}", part))?;
            (port, port)
        }
    };

    if start == 0 {
        return Err(anyhow!("Port 0 cannot be scanned"));
    }
    if start > end {
        return Err(anyhow!("Invalid range: start > end"));
    }
    Ok((start, end))
}
