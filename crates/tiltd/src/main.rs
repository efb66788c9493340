//! tiltd — the Tiltgrid daemon.
//!
//! Single binary that assembles the ingest server:
//! - Telemetry store (redb, in memory)
//! - Expiry sweeper
//! - Scale gate
//! - HTTP API
//!
//! # Usage
//!
//! ```text
//! tiltd serve --config tilt.toml --port 5000
//! tiltd print-config --config tilt.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tilt_core::TiltConfig;
use tilt_state::{ExpirySweeper, StoreOptions, TelemetryStore};

const DEFAULT_FILTER: &str = "info,tiltd=debug,tilt=debug";

#[derive(Parser)]
#[command(name = "tiltd", about = "Tiltgrid telemetry daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingest server.
    Serve {
        /// Path to tilt.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Name to report load under (overrides the config file).
        #[arg(long)]
        instance_id: Option<String>,
    },

    /// Print the effective configuration as TOML.
    PrintConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve {
            config,
            port,
            instance_id,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if instance_id.is_some() {
                config.server.instance_id = instance_id;
            }
            run_server(config).await
        }
        Command::PrintConfig { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
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

fn load_config(path: Option<&Path>) -> anyhow::Result<TiltConfig> {
    match path {
        Some(path) => TiltConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(TiltConfig::default()),
    }
}

async fn run_server(config: TiltConfig) -> anyhow::Result<()> {
    let instance_id = config.server.instance_id();
    info!(%instance_id, "Tiltgrid daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let options = StoreOptions {
        window: config.store.window()?,
        clock: config.store.clock,
    };
    let sweep_interval = config.store.sweep_interval()?;

    let store = TelemetryStore::open_in_memory_with(options).context("store unavailable")?;
    store.ping().context("store unavailable")?;
    store
        .register_instance(&instance_id)
        .context("registering instance")?;
    info!(
        window_ms = options.window.as_millis() as u64,
        clock = ?options.clock,
        "telemetry store opened"
    );

    let gate = tilt_autoscale::ScaleGate::new(&config);
    if !gate.can_execute() {
        warn!("no scale executor configured; accepted scale requests are dry runs");
    }

    let sweeper = ExpirySweeper::new(store.clone(), sweep_interval);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(shutdown_rx).await;
    });

    // ── Start API server ───────────────────────────────────────

    let state = tilt_api::ApiState::new(store, gate, instance_id);
    let router = tilt_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c; shutting down");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    join_task("expiry sweeper", sweeper_handle).await;

    info!("Tiltgrid daemon stopped");
    Ok(())
}

/// Wait for a background task, logging a panic or cancellation instead of
/// dropping it. Returns whether the task finished cleanly.
async fn join_task(name: &'static str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            warn!(task = name, error = %e, "background task failed");
            false
        }
    }
}
