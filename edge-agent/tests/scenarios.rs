//! End-to-end scenarios driving the real HTTP surface and ingest worker
//! against stubbed stage microservices and peers (spec §8 S1-S5).

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use edge_agent::config::Config;
use edge_agent::orchestrator::run_ingest_worker;
use edge_agent::state::AgentState;
use edge_agent::stage_caller::StageCaller;
use edge_agent::store::Store;
use edge_agent::transport::http::routes::{routes, AppState};

async fn post_json(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

async fn wait_until<F, Fut>(mut check: F, timeout: Duration)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
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

struct Harness {
    app: axum::Router,
    store: Arc<Store>,
    state: Arc<AgentState>,
    _dir: TempDir,
    _est_server: MockServer,
    _det_server: MockServer,
    _fine_server: MockServer,
}

async fn build_harness(detect_abnormal: bool) -> Harness {
    let est_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/estimate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"mean": 7.0})))
        .mount(&est_server)
        .await;

    let det_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/detect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"abnormal": detect_abnormal})))
        .mount(&det_server)
        .await;

    let fine_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fine"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"corrected": true})))
        .mount(&fine_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("edge_agent.db");
    let store = Arc::new(Store::open(db_path.to_str().unwrap()).await.unwrap());

    let cfg = Arc::new(Config {
        node_id: "node-a".to_string(),
        node_type: "pi".to_string(),
        est_url: format!("{}/estimate", est_server.uri()),
        det_url: format!("{}/detect", det_server.uri()),
        fine_url: format!("{}/fine", fine_server.uri()),
        peers: vec![],
        collector_url: "http://unused".to_string(),
        db_path: db_path.to_str().unwrap().to_string(),
        slot_seconds: 300,
        upload_every: 10,
        http_timeout: Duration::from_secs(2),
        execute_timeout: Duration::from_secs(2),
        peer_refresh_interval: Duration::from_secs(10),
        uploader_check_interval: Duration::from_secs(5),
    });

    let state = Arc::new(AgentState::new(&cfg.peers));
    let caller = Arc::new(StageCaller::new(&cfg));

    let rx = state.take_receiver().await;
    tokio::spawn(run_ingest_worker(
        cfg.clone(),
        state.clone(),
        store.clone(),
        caller.clone(),
        rx,
    ));

    let app = routes(AppState {
        cfg,
        agent_state: state.clone(),
        store: store.clone(),
        caller,
    });

    Harness {
        app,
        store,
        state,
        _dir: dir,
        _est_server: est_server,
        _det_server: det_server,
        _fine_server: fine_server,
    }
}

/// S1 — basic slot closure: two real ingests plus a flush close slots 0
/// and 2 (slot 1 never got a cached payload) with a baseline row each,
/// first-sight detect fires for both, and with a non-abnormal stub
/// detect no fine rows are written.
#[tokio::test]
async fn s1_basic_slot_closure() {
    let mut harness = build_harness(false).await;

    let (status, _) = post_json(
        harness.app.clone(),
        "/ingest",
        json!({"payload": {"ph": 7.0}, "event_time": 0.0}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post_json(
        harness.app.clone(),
        "/ingest",
        json!({"payload": {"ph": 7.2}, "event_time": 600.0}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post_json(
        harness.app.clone(),
        "/ingest",
        json!({"payload": {"__flush__": true}, "event_time": 900.0}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let store = harness.store.clone();
    wait_until(
        || {
            let store = store.clone();
            async move { store.get_baseline(2).await.unwrap().is_some() }
        },
        Duration::from_secs(2),
    )
    .await;

    assert!(harness.store.get_baseline(0).await.unwrap().is_some());
    assert!(harness.store.get_baseline(1).await.unwrap().is_none());
    assert!(harness.store.get_baseline(2).await.unwrap().is_some());

    let export = harness.store.export_batch(&[0, 1, 2]).await.unwrap();
    assert_eq!(export.detect.len(), 2);
    assert!(export.detect.iter().all(|d| !d.abnormal));
    assert!(export.fine.is_empty());

    assert_eq!(harness.state.lock().await.active_slot, Some(3));
}

/// S2 — abnormal detect with no peers configured dispatches exactly one
/// local FineRow.
#[tokio::test]
async fn s2_abnormal_triggers_local_fine_when_no_peers() {
    let harness = build_harness(true).await;

    post_json(
        harness.app.clone(),
        "/ingest",
        json!({"payload": {"ph": 9.9}, "event_time": 0.0}),
    )
    .await;
    post_json(
        harness.app.clone(),
        "/ingest",
        json!({"payload": {"__flush__": true}, "event_time": 300.0}),
    )
    .await;

    let store = harness.store.clone();
    wait_until(
        || {
            let store = store.clone();
            async move { !store.export_batch(&[0]).await.unwrap().fine.is_empty() }
        },
        Duration::from_secs(2),
    )
    .await;

    let export = harness.store.export_batch(&[0]).await.unwrap();
    assert_eq!(export.fine.len(), 1);
    assert!(!export.fine[0].offloaded);
    assert_eq!(export.fine[0].executed_on, "node-a");
    assert_eq!(export.fine[0].origin, "node-a");
}

/// Queue-bounded back-pressure: once the ingest channel is saturated,
/// `/ingest` answers 429 rather than blocking.
#[tokio::test]
async fn ingest_queue_rejects_when_full() {
    let harness = build_harness(false).await;

    for _ in 0..edge_agent::state::INGEST_QUEUE_CAPACITY {
        harness
            .state
            .try_enqueue(edge_agent::state::IngestItem {
                slot: 0,
                event_time: 0.0,
                trace_id: "t".to_string(),
                payload: json!({}),
            })
            .unwrap();
    }

    let (status, body) = post_json(
        harness.app.clone(),
        "/ingest",
        json!({"payload": {"ph": 7.0}, "event_time": 0.0}),
    )
    .await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["accepted"], json!(false));
}
