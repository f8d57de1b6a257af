//! canaryd — the canary rollout daemon.
//!
//! Single binary that assembles:
//! - State store (redb)
//! - Canary engine (metrics provider, traffic controller, advisory)
//! - Progression loop
//! - REST API
//!
//! # Usage
//!
//! ```text
//! canaryd standalone --config /etc/canaryd.toml --port 8480
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use canary_rollout::ProgressionLoop;
use canaryd::DaemonConfig;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

const DEFAULT_FILTER: &str = "info,canaryd=debug,canary=debug";

#[derive(Parser)]
#[command(name = "canaryd", about = "Canary rollout daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine and API in one process.
    Standalone {
        /// Path to canaryd.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Progression tick interval in seconds (overrides the config file).
        #[arg(long)]
        tick_secs: Option<u64>,

        /// Emit JSON logs.
        #[arg(long)]
        json_logs: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            config,
            port,
            data_dir,
            tick_secs,
            json_logs,
        } => {
            let mut cfg = match &config {
                Some(path) => DaemonConfig::from_file(path)?,
                None => DaemonConfig::default(),
            };
            if let Some(port) = port {
                cfg.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                cfg.store.data_dir = data_dir;
            }
            if let Some(tick_secs) = tick_secs {
                cfg.engine.tick_secs = tick_secs;
            }
            cfg.log.json |= json_logs;
            cfg.validate()?;

            init_tracing(cfg.log.json);
            run_standalone(cfg).await
        }
    }
}

async fn run_standalone(cfg: DaemonConfig) -> anyhow::Result<()> {
    info!("canary daemon starting in standalone mode");

    // ── Initialize subsystems ──────────────────────────────────

    let store = Arc::new(canaryd::open_store(&cfg.store.data_dir)?);
    let engine = canaryd::build_engine(&cfg, store)?;

    let progression = ProgressionLoop::new(engine.clone())
        .with_auto_execute_rollbacks(cfg.engine.auto_execute_rollbacks);
    info!(interval = cfg.engine.tick_secs, "progression loop initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let tick = Duration::from_secs(cfg.engine.tick_secs);
    let progression_handle = tokio::spawn(async move {
        progression.run(tick, shutdown_rx).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = canary_api::build_router(engine);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = progression_handle.await;

    info!("canary daemon stopped");
    Ok(())
}
