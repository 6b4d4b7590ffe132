//! Stitchbook Sync Server
//!
//! A reference push/pull server that keeps each workshop's rows in memory
//! and resolves concurrent edits last-write-wins.
//!
//! # Configuration
//!
//! Environment variables:
//! - `STITCHBOOK_PORT`: Port to listen on (default: 8080)
//! - `STITCHBOOK_SERVER_CONFIG`: Path to config file (default: ~/.config/stitchbook-server/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     owner_id: "workshop1"
//! ```
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `GET /sync`: Pull changes since `last_pulled_at` (auth required)
//! - `POST /sync`: Push local changes (auth required)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use stitchbook::clock::SystemClock;
use stitchbook::server::{router, ApiKeyStore, AppState, Backend};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server configuration
struct ServerConfig {
    /// Port to listen on
    port: u16,
    /// Path to config file
    config_path: PathBuf,
}

impl ServerConfig {
    fn from_env() -> Self {
        let port = std::env::var("STITCHBOOK_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let config_path = std::env::var("STITCHBOOK_SERVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("stitchbook-server")
                    .join("config.yaml")
            });

        Self { port, config_path }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stitchbook=info,stitchbook_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!("Config file: {}", config.config_path.display());

    let state = AppState {
        api_keys: Arc::new(ApiKeyStore::load(&config.config_path)),
        backend: Arc::new(Backend::new(Arc::new(SystemClock))),
    };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
