//! Component D: Peer Monitor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::state::{now_secs, AgentState};

/// A peer's last-known health, refreshed on a fixed interval. Fields other
/// than `url`/`ok`/`last_rtt_ms`/`last_seen_ts` are only updated on a
/// successful probe — a failed probe leaves them stale rather than
/// resetting them, matching the original's "update fields only on success"
/// behavior.
#[derive(Debug, Clone, Serialize)]
pub struct PeerState {
    pub url: String,
    pub ok: bool,
    pub last_rtt_ms: f64,
    pub last_seen_ts: f64,
    pub node_id: String,
    pub node_type: String,
    pub avg_ms: HashMap<String, f64>,
    pub in_flight: i64,
    pub queue_len: i64,
}

impl PeerState {
    pub fn new(url: String) -> Self {
        Self {
            url,
            ok: false,
            last_rtt_ms: 9999.0,
            last_seen_ts: 0.0,
            node_id: String::new(),
            node_type: String::new(),
            avg_ms: HashMap::new(),
            in_flight: 0,
            queue_len: 0,
        }
    }
}

/// Probes every configured peer's `/health` on a fixed interval, forever.
/// Returns immediately if no peers are configured — there is nothing to
/// probe and no point spinning an idle loop.
pub async fn refresh_peers_loop(cfg: Arc<Config>, state: Arc<AgentState>) {
    if cfg.peers.is_empty() {
        debug!("no peers configured, peer monitor is a no-op");
        return;
    }

    let client = reqwest::Client::builder()
        .timeout(cfg.http_timeout)
        .build()
        .expect("failed to build peer monitor HTTP client");

    loop {
        for peer in &cfg.peers {
            probe_peer(&client, &state, peer).await;
        }
        tokio::time::sleep(cfg.peer_refresh_interval).await;
    }
}

async fn probe_peer(client: &reqwest::Client, state: &AgentState, peer: &str) {
    let url = format!("{}/health", peer.trim_end_matches('/'));
    let t0 = Instant::now();
    let body = fetch_health(client, &url).await;
    let rtt_ms = t0.elapsed().as_secs_f64() * 1000.0;

    let mut shared = state.lock().await;
    let entry = shared
        .peers
        .entry(peer.to_string())
        .or_insert_with(|| PeerState::new(peer.to_string()));

    entry.last_rtt_ms = rtt_ms;
    entry.last_seen_ts = now_secs();

    match body {
        Some(body) => {
            entry.ok = true;
            entry.node_id = body
                .get("node_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            entry.node_type = body
                .get("node_type")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            entry.avg_ms = body
                .get("avg_ms")
                .and_then(|v| v.as_object())
                .map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
                        .collect()
                })
                .unwrap_or_default();
            entry.in_flight = body.get("in_flight").and_then(|v| v.as_i64()).unwrap_or(0);
            entry.queue_len = body.get("queue_len").and_then(|v| v.as_i64()).unwrap_or(0);
        }
        None => {
            entry.ok = false;
        }
    }
}

async fn fetch_health(client: &reqwest::Client, url: &str) -> Option<serde_json::Value> {
    let response = client.get(url).send().await.ok()?;
    let response = response.error_for_status().ok()?;
    response.json::<serde_json::Value>().await.ok()
}
