//! voxfab-ed - Voice editing service
//!
//! Loads TTS models, generates a working artifact from text, edits it
//! (crop, pitch, speed, reset) and commits kept takes into per-model
//! datasets. Inference and DSP run in the voice worker reached through
//! `HttpBridge`, or locally with `--mock-engine`.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use voxfab_common::config::{
    default_config_path, load_toml_config, LoggingConfig, RootFolderInitializer,
    RootFolderResolver,
};
use voxfab_common::fs::sweep_temp_files;
use voxfab_ed::engine::{bridge::HttpBridge, mock::MockEngine, Collaborators};
use voxfab_ed::AppState;

const MODULE_NAME: &str = "voxfab-ed";

/// Command-line arguments for voxfab-ed
#[derive(Parser, Debug)]
#[command(name = "voxfab-ed")]
#[command(about = "Voice synthesis editing service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "VOXFAB_ED_PORT")]
    port: Option<u16>,

    /// Root folder holding models, working audio and datasets
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Voice worker base URL (overrides the config file)
    #[arg(long, env = "VOXFAB_BRIDGE_URL")]
    bridge_url: Option<String>,

    /// Run synthesis and DSP locally with the mock engine
    #[arg(long)]
    mock_engine: bool,
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", logging.level)));

    let file_layer = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(|| default_config_path(MODULE_NAME));
    let mut config = load_toml_config(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_tracing(&config.logging)?;

    info!(
        "Starting {} v{} (git {}, built {}, {})",
        MODULE_NAME,
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) if path.exists() => info!("Config file: {}", path.display()),
        Some(path) => warn!("Config file {} not found, using defaults", path.display()),
        None => warn!("No config file location, using defaults"),
    }

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(url) = args.bridge_url.clone() {
        config.bridge_url = url;
    }

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_toml(&config)
        .resolve();
    let layout = RootFolderInitializer::new(root_folder);
    layout
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
    info!("Root folder: {}", layout.root_folder().display());

    // Temp files left by renders that timed out or crashed before committing
    match sweep_temp_files(&layout.work_dir()).await {
        Ok(0) => {}
        Ok(n) => info!("Removed {} stale temp files from the work directory", n),
        Err(e) => warn!("Failed to sweep the work directory: {}", e),
    }

    let collaborators = if args.mock_engine {
        warn!("Using the mock engine, no real synthesis will happen");
        Collaborators::uniform(Arc::new(MockEngine::new()))
    } else {
        info!("Voice worker: {}", config.bridge_url);
        let bridge = HttpBridge::new(config.bridge_url.clone())
            .map_err(|e| anyhow::anyhow!("Failed to create voice worker client: {}", e))?;
        Collaborators::uniform(Arc::new(bridge))
    };

    info!(
        capacity = config.cache.capacity,
        ttl_secs = config.cache.ttl_secs,
        "Model cache configured"
    );

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind_address, config.port))?;

    let state = AppState::new(layout, config, collaborators);
    let app = voxfab_ed::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
