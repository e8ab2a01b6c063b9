//! Blocklift Server
//!
//! Accepts multipart file uploads and streams each file to an object store
//! as staged blocks, resuming interrupted uploads where they stopped.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::sync::Mutex;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blocklift_server::config::{Config, StorageConfig};
use blocklift_server::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Invalid configuration")?;

    // Initialize tracing, optionally mirrored to a log file
    let file_layer = match &config.server.log_file {
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
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "blocklift_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    tracing::info!("Starting Blocklift Server v{}", env!("CARGO_PKG_VERSION"));
    match &config.storage {
        StorageConfig::S3(s3) => {
            tracing::info!("S3 endpoint: {}", s3.endpoint.as_deref().unwrap_or("default"));
            tracing::info!("S3 bucket: {}", s3.bucket);
        }
        StorageConfig::Local(local) => {
            tracing::info!("Local storage: {}", local.root.display());
        }
    }
    tracing::info!(
        chunk_size = config.upload.chunk_size,
        max_retries = config.upload.max_retries,
        "Upload defaults"
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid SERVER_HOST/SERVER_PORT")?;

    let app_state = AppState::new(config)
        .await
        .context("Failed to initialize application state")?;

    let app = create_router(app_state);

    // Start server with graceful shutdown
    tracing::info!("Blocklift Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
