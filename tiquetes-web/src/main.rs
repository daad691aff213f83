//! tiquetes-web - fruit reception service
//!
//! Registers incoming fruit deliveries through entry, weighing,
//! classification and exit, backed by SQLite under the root folder.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiquetes_common::config::{
    resolve_root_folder, ConfigOverrides, RootLayout, RuntimeSettings, TomlConfig, ROOT_FOLDER_ENV,
};
use tiquetes_common::db::init_database;
use tiquetes_web::{build_router, AppState};

/// Command-line arguments for tiquetes-web
#[derive(Parser, Debug)]
#[command(name = "tiquetes-web")]
#[command(about = "Fruit reception service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "TIQUETES_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "TIQUETES_PORT")]
    port: Option<u16>,

    /// Root folder for database, uploads and results (also TIQUETES_ROOT)
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Database file (defaults to <root>/tiquetes.db)
    #[arg(long, env = "TIQUETES_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply_overrides(ConfigOverrides {
        port: args.port,
        root_folder: None,
        database_path: args.database.clone(),
    });

    // Initialize tracing; RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tiquetes_web={0},tiquetes_common={0},tower_http=info", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tiquetes-web v{}", env!("CARGO_PKG_VERSION"));

    let root = resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        config.root_folder.as_deref(),
    );
    let layout = RootLayout::new(root, config.database_path.clone());
    layout
        .ensure_directories()
        .with_context(|| format!("Failed to create root folder {}", layout.root.display()))?;
    info!("Root folder: {}", layout.root.display());
    info!("Database path: {}", layout.database_path.display());

    let pool = init_database(&layout.database_path)
        .await
        .context("Failed to initialize database")?;
    let settings = RuntimeSettings::load(&pool)
        .await
        .context("Failed to load runtime settings")?;

    let unconfigured: Vec<&str> = [
        ("process", &config.webhooks.process),
        ("register", &config.webhooks.register),
        ("pesaje", &config.webhooks.pesaje),
        ("autorizacion", &config.webhooks.autorizacion),
    ]
    .iter()
    .filter(|(_, url)| url.trim().is_empty())
    .map(|(name, _)| *name)
    .collect();
    if !unconfigured.is_empty() {
        warn!("Webhooks not configured: {}", unconfigured.join(", "));
    }

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(pool, config, settings, layout).context("Failed to build application state")?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("tiquetes-web listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
