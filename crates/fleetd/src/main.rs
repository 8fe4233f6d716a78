//! fleetd — the fleet update daemon.
//!
//! Single binary that assembles the update subsystems:
//! - State store (redb)
//! - Operator REST API
//! - Update workers (sidecar swap for agents, direct swap otherwise)
//! - Rollout control loop (auto-halt, wave advancement, stale job recovery)
//!
//! # Usage
//!
//! ```text
//! fleetd standalone --config /etc/fleet/fleet.toml --port 8080 --data-dir /var/lib/fleet
//! fleetd worker --config /etc/fleet/fleet.toml
//! ```

mod control_loop;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use fleet_core::FleetConfig;
use fleet_sidecar::HttpTenantControl;
use fleet_state::StateStore;
use fleet_worker::{Executor, Worker};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::control_loop::ControlLoop;

const DEFAULT_FILTER: &str = "info,fleetd=debug,fleet=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet update daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// API, workers, and control loop in one process.
    Standalone {
        #[command(flatten)]
        common: CommonArgs,

        /// Port for the operator API; overrides `api.listen`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Workers and control loop, no API.
    Worker {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Path to fleet.toml. Defaults apply when the file does not exist.
    #[arg(long, default_value = "/etc/fleet/fleet.toml")]
    config: PathBuf,

    /// Data directory for the state store; overrides `store.path`.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Standalone { common, port } => {
            let mut config = load_config(&common)?;
            if let Some(port) = port {
                let mut addr: SocketAddr = config.api.listen.parse()?;
                addr.set_port(port);
                config.api.listen = addr.to_string();
            }
            run_standalone(config).await
        }
        Command::Worker { common } => run_worker(load_config(&common)?).await,
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &CommonArgs) -> anyhow::Result<FleetConfig> {
    let mut config = if args.config.exists() {
        FleetConfig::from_file(&args.config)?
    } else {
        info!(path = ?args.config, "config file not found, using defaults");
        FleetConfig::default()
    };
    if let Some(dir) = &args.data_dir {
        config.store.path = dir.join("fleet.redb");
    }
    Ok(config)
}

fn open_store(path: &Path) -> anyhow::Result<StateStore> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = StateStore::open(path)?;
    info!(path = ?path, "state store opened");
    Ok(store)
}

/// Spawn the worker pool and the control loop against `store`.
fn spawn_background(
    store: &StateStore,
    config: &FleetConfig,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let control = HttpTenantControl::new(
        &config.worker.endpoint_template,
        Duration::from_secs(config.sidecar.request_timeout_secs),
    );
    let executor = Arc::new(Executor::new(control, store.clone(), &config.sidecar));

    let mut handles = Vec::with_capacity(config.worker.concurrency + 1);
    for i in 0..config.worker.concurrency {
        let id = format!("fleetd-{}-w{i}", std::process::id());
        let worker = Worker::new(&id, store.clone(), Arc::clone(&executor), &config.queue);
        let rx = shutdown.clone();
        handles.push(tokio::spawn(async move { worker.run(rx).await }));
    }
    info!(workers = config.worker.concurrency, "update workers started");

    let control_loop = ControlLoop::new(store.clone(), config);
    let rx = shutdown.clone();
    handles.push(tokio::spawn(async move { control_loop.run(rx).await }));
    handles
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}

async fn run_standalone(config: FleetConfig) -> anyhow::Result<()> {
    info!("fleet daemon starting in standalone mode");
    let store = open_store(&config.store.path)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = spawn_background(&store, &config, &shutdown_rx);

    let router = fleet_api::build_router(fleet_api::ApiState::new(store, &config));
    let addr: SocketAddr = config.api.listen.parse()?;
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    for handle in handles {
        let _ = handle.await;
    }
    info!("fleet daemon stopped");
    Ok(())
}

async fn run_worker(config: FleetConfig) -> anyhow::Result<()> {
    info!("fleet daemon starting in worker mode");
    let store = open_store(&config.store.path)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = spawn_background(&store, &config, &shutdown_rx);

    shutdown_signal(shutdown_tx).await;
    for handle in handles {
        let _ = handle.await;
    }
    info!("fleet daemon stopped");
    Ok(())
}
