//! edge-agent binary: wires the frozen config, durable store, shared
//! runtime state and HTTP client together, spawns the three background
//! loops (ingest worker, peer monitor, uploader), and serves the HTTP
//! surface until shutdown.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use edge_agent::config::load_config;
use edge_agent::orchestrator::run_ingest_worker;
use edge_agent::peer::refresh_peers_loop;
use edge_agent::store::Store;
use edge_agent::transport::{serve, AppState, ServerConfig};
use edge_agent::uploader::run_uploader_loop;
use edge_agent::{AgentState, StageCaller};

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
        EnvFilter::new(format!("edge_agent={level}"))
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
    info!(node_id = %cfg.node_id, node_type = %cfg.node_type, "edge-agent starting");

    let store = Arc::new(Store::open(&cfg.db_path).await?);
    let state = Arc::new(AgentState::new(&cfg.peers));
    let caller = Arc::new(StageCaller::new(&cfg));

    let ingest_rx = state.take_receiver().await;
    tokio::spawn(run_ingest_worker(
        cfg.clone(),
        state.clone(),
        store.clone(),
        caller.clone(),
        ingest_rx,
    ));
    tokio::spawn(refresh_peers_loop(cfg.clone(), state.clone()));
    tokio::spawn(run_uploader_loop(cfg.clone(), state.clone(), store.clone()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let server_config = ServerConfig {
        host: "0.0.0.0".to_string(),
        port,
    };

    let app_state = AppState {
        cfg,
        agent_state: state,
        store,
        caller,
    };

    serve(server_config, app_state).await
}
