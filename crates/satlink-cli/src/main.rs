//! Command-line interface for the Satlink ground-station engine.

mod app;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use app::App;
use satlink_broadcast::{BroadcastOrchestrator, HttpBroadcastGateway, LightningCliGateway};
use satlink_core::{BroadcastId, CommandKind, SatlinkConfig};
use satlink_storage::{RedbStore, TelemetryStore};

/// Satlink - ground-station link manager and broadcast orchestrator.
#[derive(Parser, Debug)]
#[command(name = "satlink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Path to the configuration file.
    #[arg(short, long, global = true, default_value = "satlink.toml")]
    config: PathBuf,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine: link session, alerting, and broadcast resume.
    Run,
    /// Connect to the asset and send a single command.
    SendCommand {
        /// Command kind: reboot or steer.
        kind: String,
        /// Parameters as key=value pairs.
        #[arg(short, long)]
        param: Vec<String>,
    },
    /// Submit a file for satellite broadcast and wait for the outcome.
    Broadcast {
        /// File to broadcast.
        file: PathBuf,
        /// Bid in millisatoshis; defaults to the configured bid.
        #[arg(long)]
        bid_msat: Option<u64>,
    },
    /// Cancel an unpaid broadcast request.
    Cancel {
        /// Broadcast request id.
        id: String,
    },
    /// Show persisted state: latest reading, alerts, broadcasts.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = SatlinkConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    match args.command {
        Command::Run => run(config).await,
        Command::SendCommand { kind, param } => send_command(config, kind, param).await,
        Command::Broadcast { file, bid_msat } => broadcast(config, file, bid_msat).await,
        Command::Cancel { id } => cancel(config, id).await,
        Command::Status => status(config).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "satlink=debug,info" } else { "satlink=info,warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let json_logging = std::env::var("SATLINK_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    if json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

async fn run(config: SatlinkConfig) -> Result<()> {
    let app = App::start(config).await?;
    tracing::info!("engine running, ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;

    let health = app.link_health().await;
    tracing::info!(
        status = %health.status,
        dropped = app.telemetry_drop_count(),
        degraded_storage = app.storage_degraded(),
        "shutting down"
    );
    app.shutdown().await;
    Ok(())
}

async fn send_command(config: SatlinkConfig, kind: String, params: Vec<String>) -> Result<()> {
    let kind = match kind.as_str() {
        "reboot" => CommandKind::Reboot,
        "steer" => CommandKind::Steer,
        other => anyhow::bail!("unknown command kind: {}", other),
    };
    let parameters = params
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("malformed parameter (want key=value): {}", pair))
        })
        .collect::<Result<Vec<_>>>()?;

    let app = App::start(config).await?;
    match app.send_command(kind, parameters).await {
        Ok(command) => println!("command {} {}", command.id, command.status),
        Err(e) => println!("command failed: {}", e),
    }
    app.shutdown().await;
    Ok(())
}

/// Build the orchestrator without a link session; broadcast submission is
/// independent of the command/telemetry link.
fn orchestrator_only(config: &SatlinkConfig) -> Result<BroadcastOrchestrator> {
    let store: Arc<dyn TelemetryStore> = Arc::new(
        RedbStore::open(&config.storage.path)
            .with_context(|| format!("opening store at {}", config.storage.path))?,
    );
    Ok(BroadcastOrchestrator::new(
        store,
        Arc::new(HttpBroadcastGateway::new(&config.broadcast.api_base)),
        Arc::new(LightningCliGateway::new(&config.broadcast.lightning_cli)),
        config.broadcast.clone(),
    ))
}

async fn broadcast(config: SatlinkConfig, file: PathBuf, bid_msat: Option<u64>) -> Result<()> {
    let bid = bid_msat.unwrap_or(config.broadcast.default_bid_msat);
    let orchestrator = orchestrator_only(&config)?;
    orchestrator.resume().await?;

    let file = file.to_string_lossy().to_string();
    let id = orchestrator.submit(&file, bid).await?;
    println!("submitted {} (bid {} msat), waiting for outcome...", id, bid);

    let record = orchestrator.wait(id).await?;
    match record.error {
        None => println!("{}: {}", id, record.state),
        Some(reason) => println!("{}: {} ({})", id, record.state, reason),
    }
    Ok(())
}

async fn cancel(config: SatlinkConfig, id: String) -> Result<()> {
    let id = BroadcastId::from_string(&id).context("invalid broadcast id")?;
    let orchestrator = orchestrator_only(&config)?;
    orchestrator.resume().await?;

    let record = orchestrator.cancel(id).await?;
    println!("{}: {}", record.id, record.state);
    Ok(())
}

async fn status(config: SatlinkConfig) -> Result<()> {
    let store = RedbStore::open(&config.storage.path)
        .with_context(|| format!("opening store at {}", config.storage.path))?;

    match store.latest_reading().await? {
        Some(reading) => println!(
            "latest reading at {}: signal {:.2}, snr {:.1} dB, ber {:.2e}, temp {:.1} C",
            reading.timestamp,
            reading.signal_strength,
            reading.snr_db,
            reading.ber,
            reading.temperature_c
        ),
        None => println!("no telemetry recorded yet"),
    }

    let alerts = store.alert_history(10).await?;
    println!("recent alerts: {}", alerts.len());
    for alert in alerts {
        println!(
            "  {} {} {} {} (threshold {})",
            alert.triggered_at, alert.parameter, alert.comparator, alert.value, alert.threshold
        );
    }

    let broadcasts = store.broadcast_history().await?;
    println!("broadcast requests: {}", broadcasts.len());
    for record in broadcasts {
        match record.error {
            None => println!("  {} {} {}", record.id, record.file_path, record.state),
            Some(reason) => println!(
                "  {} {} {} ({})",
                record.id, record.file_path, record.state, reason
            ),
        }
    }
    Ok(())
}
