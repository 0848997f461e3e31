//! Courier Hub Server
//!
//! Run with: cargo run
//!
//! # Configuration
//!
//! Loaded from a TOML file (`--config`, or the default search locations)
//! with environment variable overrides:
//! - `COURIER_HOST`: Host to bind to (default: 0.0.0.0)
//! - `COURIER_PORT`: Port to listen on (default: 8090)
//! - `COURIER_HEARTBEAT_INTERVAL_SECS`: Supervisor cycle (default: 30)
//! - `COURIER_LOG_LEVEL` / `COURIER_LOG_FORMAT`: Logging
//! - `RUST_LOG`: Fine-grained log filter (overrides the config level)

use clap::Parser;
use courier::api::{serve, AppState};
use courier::config::{generate_default_config, Config};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Realtime connection hub with tiered transport fallback
#[derive(Parser, Debug)]
#[command(name = "courier", version, about)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Print a default config file and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.generate_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config);

    tracing::info!("Starting Courier hub v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Hub paths: {:?}", config.websocket.paths);
    tracing::info!("Overlay path: {}", config.overlay.path);
    tracing::info!(
        "Heartbeat interval: {}s, probe interval: {}s",
        config.websocket.heartbeat_interval_secs,
        config.websocket.probe_interval_secs
    );

    let metrics = courier::metrics::install_recorder();
    let state = AppState::new(config, metrics);

    serve(state).await?;

    tracing::info!("Courier stopped");
    Ok(())
}

/// Initialize tracing from the logging config
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("courier={},tower_http=debug", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
