// ABOUTME: Entry point for the telespool binary.
// ABOUTME: Loads config from env and CLI flags, initializes tracing, and runs the fill/drain controller.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use telespool_core::{QoS, Session};
use telespool_pipeline::{DrainMode, HttpSession, PipelineConfig, PipelineController};
use telespool_store::SpoolStore;
use tokio_util::sync::CancellationToken;

/// Durable store-and-forward spooler: fills a local log, then drains it to a
/// session endpoint in order once the link is up.
#[derive(Debug, Parser)]
#[command(name = "telespool", version, about)]
struct Cli {
    /// Store root directory (overrides TELESPOOL_HOME)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Session endpoint base URL (overrides TELESPOOL_ENDPOINT)
    #[arg(long)]
    endpoint: Option<String>,

    /// Publish topic (overrides TELESPOOL_TOPIC)
    #[arg(long)]
    topic: Option<String>,

    /// Delivery level 0, 1 or 2 (overrides TELESPOOL_QOS)
    #[arg(long)]
    qos: Option<u8>,

    /// Records written by a fresh fill (overrides TELESPOOL_FILL_QUOTA)
    #[arg(long)]
    quota: Option<u64>,

    /// Give up waiting for the session after this many seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Drain the log a single time, then exit
    #[arg(long)]
    once: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn apply(&self, config: &mut PipelineConfig) -> anyhow::Result<()> {
        if let Some(home) = &self.home {
            config.home = home.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(topic) = &self.topic {
            config.topic = topic.clone();
        }
        if let Some(level) = self.qos {
            config.qos = QoS::from_level(level)
                .with_context(|| format!("--qos must be 0, 1 or 2, got {}", level))?;
        }
        if let Some(quota) = self.quota {
            config.fill_quota = quota;
        }
        if let Some(secs) = self.connect_timeout {
            config.connect_timeout = Some(Duration::from_secs(secs));
        }
        if self.once {
            config.drain_mode = DrainMode::Once;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("telespool=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = ?e, "telespool failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = PipelineConfig::from_env().context("invalid configuration")?;
    cli.apply(&mut config)?;

    tracing::info!(
        home = %config.home.display(),
        endpoint = %config.endpoint,
        topic = %config.topic,
        mode = ?config.drain_mode,
        "telespool starting up"
    );

    let store = SpoolStore::open(config.home.clone(), config.capacity_bytes)
        .with_context(|| format!("cannot open store at {}", config.home.display()))?;
    let session: Arc<dyn Session> = Arc::new(
        HttpSession::new(&config.endpoint, &config.client_id, config.publish_timeout)
            .context("cannot create session")?,
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    let report = PipelineController::new(config, store, session)
        .with_cancellation(cancel)
        .run()
        .await;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("cannot serialize run report")?
        );
    }

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
