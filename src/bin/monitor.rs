use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use health_monitor::{
    config::{ProfileConfig, read_config_file},
    engine::MonitorEngine,
    sinks::{LogSink, WebhookSink},
    util::{get_config_path, get_profile},
};
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Samples metric sources and reports their health")]
struct Args {
    /// Config file, defaults to `MONITOR_CONFIG` or `config.json`
    #[arg(short)]
    file: Option<PathBuf>,

    /// Profile to run, defaults to `MONITOR_PROFILE` or `production`
    #[arg(long)]
    profile: Option<String>,
}

fn init(profile: &ProfileConfig) {
    let level = if profile.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let filter = filter::Targets::new().with_targets(vec![("health_monitor", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let file = args.file.unwrap_or_else(get_config_path);
    let profile_name = args.profile.unwrap_or_else(get_profile);

    let config = read_config_file(&file)
        .with_context(|| format!("failed to load {}", file.display()))?;
    let profile = config.profile(&profile_name)?;

    init(profile);
    trace!("loaded profile {profile_name}: {profile:?}");

    let engine = MonitorEngine::new(profile).context("invalid configuration")?;

    engine.subscribe(Arc::new(LogSink)).await;
    if let Some(webhook) = &profile.webhook {
        debug!("forwarding alerts to {}", webhook.url);
        engine.subscribe(Arc::new(WebhookSink::new(&webhook.url))).await;
    }

    info!("starting monitor with profile {profile_name}");
    engine.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    engine.shutdown().await;

    let report = engine.current_report();
    info!("final status: {}", report.status);
    for source in report.sources.values() {
        match &source.last_error {
            Some(error) => warn!(
                "{}: {} after {} cycle(s), last error: {error}",
                source.source_id, source.status(), source.cycles
            ),
            None => info!(
                "{}: {} after {} cycle(s)",
                source.source_id,
                source.status(),
                source.cycles
            ),
        }
    }

    Ok(())
}
