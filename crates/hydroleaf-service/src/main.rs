//! Hydroleaf Service - Telemetry ingestion and aggregated history API.
//!
//! Run with: `cargo run -p hydroleaf-service`

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use hydroleaf_core::FlushScheduler;
use hydroleaf_service::{AppState, Config, api};
use hydroleaf_store::Store;

/// Hydroleaf Service - Telemetry ingestion and aggregated history API.
#[derive(Parser, Debug)]
#[command(name = "hydroleaf-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Flush interval in seconds (overrides config).
    #[arg(long)]
    flush_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hydroleaf_service=info".parse()?)
                .add_directive("hydroleaf_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!("Using default configuration: {}", e);
            Config::default()
        }),
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    if let Some(secs) = args.flush_interval {
        config.ingest.flush_interval_secs = secs;
    }
    config.validate()?;

    info!("Opening database at {:?}", config.storage.path);
    let store = Store::open(&config.storage.path)?;

    let state = AppState::new(store, config.clone());

    let scheduler = FlushScheduler::start_with_stats(
        state.telemetry.accumulator(),
        config.ingest.flush_interval(),
        state.flush_stats.clone(),
    );

    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr: SocketAddr = config.server.bind.parse()?;
    info!("Starting server on {}", addr);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    let outcome = scheduler.shutdown().await?;
    info!("Final flush wrote {} rollups", outcome.written);

    Ok(())
}
