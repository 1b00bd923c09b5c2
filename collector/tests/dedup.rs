//! S6 — posting the same batch twice is a no-op on the second attempt:
//! one `upload_batches` row, and per-slot tables carry each row once
//! except `fine_all`, which is append-only and must not grow.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tempfile::TempDir;
use tower::ServiceExt;

use collector::config::Config;
use collector::store::Store;
use collector::transport::http::routes::{routes, AppState};

fn sample_batch(batch_id: &str) -> serde_json::Value {
    json!({
        "batch_id": batch_id,
        "sent_ts": 100.0,
        "node_id": "node-a",
        "node_type": "pi",
        "slots": [0, 1],
        "baseline": [
            {"slot": 0, "trace_id": "t0", "created_ts": 100.0, "payload": {"mean": 7.0}},
            {"slot": 1, "trace_id": "t1", "created_ts": 101.0, "payload": {"mean": 7.1}},
        ],
        "detect": [
            {"slot": 0, "trace_id": "t0", "created_ts": 100.0, "abnormal": false, "payload": {}},
            {"slot": 1, "trace_id": "t1", "created_ts": 101.0, "abnormal": true, "payload": {}},
        ],
        "fine": [
            {"slot": 1, "trace_id": "t1", "created_ts": 101.0, "offloaded": false,
             "executed_on": "node-a", "origin": "node-a", "ok": true, "duration_ms": 12.0, "payload": {}},
        ],
    })
}

#[tokio::test]
async fn posting_the_same_batch_twice_does_not_duplicate_rows() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("collector.db");
    let store = Arc::new(Store::open(db_path.to_str().unwrap()).await.unwrap());
    let cfg = Arc::new(Config {
        db_path: db_path.to_str().unwrap().to_string(),
        host: "0.0.0.0".to_string(),
        port: 9000,
    });
    let app = routes(AppState { cfg, store: store.clone() });

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload_batch")
                    .header("content-type", "application/json")
                    .body(Body::from(sample_batch("batch-dup").to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["ok"], json!(true));
    }

    assert_eq!(store.count_upload_batches().await.unwrap(), 1);
    assert_eq!(store.count_baseline_rows("node-a", 0).await.unwrap(), 1);
    assert_eq!(store.count_baseline_rows("node-a", 1).await.unwrap(), 1);
    assert_eq!(store.count_fine_rows("node-a", 1).await.unwrap(), 1);
}
