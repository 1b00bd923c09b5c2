//! HTTP server implementation.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use super::routes::{routes, AppState};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Serves the agent's HTTP surface (`/ingest`, `/execute`, `/health`)
/// until a shutdown signal arrives. Background tasks (ingest worker,
/// peer monitor, uploader) are not awaited here — they are spawned
/// separately by `main` and, per the concurrency model, are allowed to
/// drop undelivered work on shutdown.
pub async fn serve(config: ServerConfig, state: AppState) -> anyhow::Result<()> {
    let app = routes(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;
    info!("starting edge-agent HTTP server on {}", actual_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Waits for SIGINT (all platforms) or SIGTERM (Unix only).
///
/// # Panics
///
/// Panics if the signal handlers cannot be installed, which can only
/// happen if the Tokio runtime was not configured correctly at startup —
/// an unrecoverable condition worth failing fast on.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("received SIGTERM, shutting down...");
        }
    }
}
