//! collector binary: opens the durable store and serves `/upload_batch`
//! and `/health` until shutdown.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use collector::config::load_config;
use collector::store::Store;
use collector::transport::{serve, AppState, ServerConfig};

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("LOG_LEVEL").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("collector={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() != Ok("console");

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = Arc::new(load_config()?);
    info!(db_path = %cfg.db_path, "collector starting");

    let store = Arc::new(Store::open(&cfg.db_path).await?);

    let server_config = ServerConfig {
        host: cfg.host.clone(),
        port: cfg.port,
    };
    let app_state = AppState { cfg, store };

    serve(server_config, app_state).await
}
