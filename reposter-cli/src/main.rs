//! Reposter CLI
//!
//! Starts the workflow controller against a remote UI-automation backend and
//! keeps it running until Ctrl-C or a fatal failure.

use anyhow::{Context, Result};
use clap::Parser;
use reposter::{
    BackendLauncher, Config, CycleDriver, DedupLedger, RecoveryPolicy, SessionManager, UiMap,
    WireBackend, Workflow, WorkflowConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reposter")]
#[command(about = "Resilient repost loop against a remote UI-automation backend")]
struct Cli {
    /// Path to a JSON config file; flags below override it.
    #[arg(long, env = "REPOSTER_CONFIG")]
    config: Option<PathBuf>,

    /// Control endpoint of the backend server.
    #[arg(long, env = "REPOSTER_BACKEND_URL")]
    backend_url: Option<String>,

    /// Device identifier (udid) to bind the session to.
    #[arg(long, env = "REPOSTER_DEVICE")]
    device: Option<String>,

    /// Username whose conversation is monitored for new content.
    #[arg(long, env = "REPOSTER_USERNAME")]
    username: Option<String>,

    /// Seconds between workflow cycles.
    #[arg(long)]
    interval: Option<u64>,

    /// Dedup ledger file.
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Launch the backend ourselves with this command (e.g. "appium").
    #[arg(long)]
    backend_command: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(url) = cli.backend_url {
        config.backend_url = url;
    }
    if let Some(device) = cli.device {
        config.device.udid = device;
    }
    if let Some(username) = cli.username {
        config.username = username;
    }
    if let Some(interval) = cli.interval {
        config.check_interval_secs = interval;
    }
    if let Some(ledger) = cli.ledger {
        config.ledger_path = ledger;
    }
    if let Some(command) = cli.backend_command {
        config.backend_command = Some(command.split_whitespace().map(str::to_string).collect());
    }
    if config.username.is_empty() {
        anyhow::bail!("no username to monitor; pass --username or set it in the config");
    }

    info!(
        backend = %config.backend_url,
        username = %config.username,
        interval_secs = config.check_interval_secs,
        "starting reposter"
    );

    let backend = Arc::new(
        WireBackend::new(&config.backend_url, Duration::from_secs(60))
            .context("building backend client")?,
    );
    let launcher = config.backend_command.clone().map(|command| {
        BackendLauncher::new(
            command,
            config.backend_kill_pattern.clone(),
            Duration::from_secs(config.backend_ready_timeout_secs),
        )
    });
    let sessions = SessionManager::new(backend.clone(), config.device.clone(), launcher);

    let ledger = DedupLedger::open(&config.ledger_path)
        .with_context(|| format!("opening ledger {}", config.ledger_path.display()))?;
    let workflow = Workflow::new(
        backend,
        UiMap::for_conversation(&config.username),
        ledger,
        WorkflowConfig::from(&config),
    );

    let mut driver = CycleDriver::new(
        sessions,
        workflow,
        RecoveryPolicy::default(),
        config.check_interval(),
    );

    let shutdown = driver.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, draining current cycle");
            shutdown.cancel();
        }
    });

    driver.run().await.context("cycle driver failed")?;
    Ok(())
}
