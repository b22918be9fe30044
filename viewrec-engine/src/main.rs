//! Viewrec engine - main entry point
//!
//! Serves the engagement tracking API over HTTP, persisting views in
//! `<root>/viewrec.db`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use viewrec_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use viewrec_common::db::init_database;
use viewrec_common::events::EventBus;
use viewrec_engine::{
    build_router, AppState, SqliteLedger, TokioTimer, ViewAggregator, ViewRecorder, ViewTracker,
};

const DEFAULT_PORT: u16 = 5750;

/// Command-line arguments for viewrec-engine
#[derive(Parser, Debug)]
#[command(name = "viewrec-engine")]
#[command(about = "Engagement tracking and view recording service")]
#[command(version)]
struct Args {
    /// Port to listen on (default 5750)
    #[arg(short, long, env = "VIEWREC_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "VIEWREC_HOST")]
    host: std::net::IpAddr,

    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Config file (default: platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    // Logged once the subscriber is installed
    let (toml_config, config_load) = TomlConfig::locate_and_load(args.config.as_deref());

    let level = toml_config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("viewrec_engine={level},viewrec_common={level},tower_http=debug").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting viewrec-engine v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    config_load.log();

    let engagement = toml_config.engagement.clone();
    let port = args.port.or(toml_config.port).unwrap_or(DEFAULT_PORT);

    let root_folder = RootFolderResolver::new("viewrec-engine")
        .with_cli_arg(args.root_folder)
        .with_toml(toml_config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to create root folder")?;

    let db_path = initializer.database_path();
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let ledger = Arc::new(SqliteLedger::new(pool));
    let events = Arc::new(EventBus::default());
    let recorder =
        ViewRecorder::new(ledger.clone(), engagement.ledger_timeout()).with_events(events.clone());
    let aggregator = ViewAggregator::new(ledger.clone(), engagement.clone());
    let tracker = ViewTracker::new(
        engagement,
        recorder,
        ledger,
        Arc::new(TokioTimer),
        events.clone(),
    );

    let app = build_router(AppState::new(tracker, aggregator, events));
    let addr = SocketAddr::new(args.host, port);
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
