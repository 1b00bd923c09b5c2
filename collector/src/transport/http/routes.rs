//! HTTP route handlers: `/upload_batch`, `/health`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::state::now_secs;
use crate::store::{BaselineEntry, BatchOutcome, DetectEntry, FineEntry, Store, UploadBatch};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: Arc<Store>,
}

#[derive(Debug, Deserialize)]
pub struct BaselineEntryReq {
    pub slot: i64,
    pub trace_id: String,
    pub created_ts: f64,
    #[serde(default = "default_payload")]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
pub struct DetectEntryReq {
    pub slot: i64,
    pub trace_id: String,
    pub created_ts: f64,
    pub abnormal: bool,
    #[serde(default = "default_payload")]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
pub struct FineEntryReq {
    pub slot: i64,
    pub trace_id: String,
    pub created_ts: f64,
    pub offloaded: bool,
    pub executed_on: String,
    pub origin: String,
    pub ok: bool,
    pub duration_ms: f64,
    #[serde(default = "default_payload")]
    pub payload: Value,
}

fn default_payload() -> Value {
    serde_json::json!({})
}

#[derive(Debug, Deserialize)]
pub struct UploadBatchRequest {
    pub batch_id: String,
    pub sent_ts: f64,
    pub node_id: String,
    pub node_type: String,
    pub slots: Vec<i64>,
    #[serde(default)]
    pub baseline: Vec<BaselineEntryReq>,
    #[serde(default)]
    pub detect: Vec<DetectEntryReq>,
    #[serde(default)]
    pub fine: Vec<FineEntryReq>,
}

impl From<UploadBatchRequest> for UploadBatch {
    fn from(req: UploadBatchRequest) -> Self {
        UploadBatch {
            batch_id: req.batch_id,
            sent_ts: req.sent_ts,
            node_id: req.node_id,
            node_type: req.node_type,
            slots: req.slots,
            baseline: req
                .baseline
                .into_iter()
                .map(|e| BaselineEntry {
                    slot: e.slot,
                    trace_id: e.trace_id,
                    created_ts: e.created_ts,
                    payload: e.payload,
                })
                .collect(),
            detect: req
                .detect
                .into_iter()
                .map(|e| DetectEntry {
                    slot: e.slot,
                    trace_id: e.trace_id,
                    created_ts: e.created_ts,
                    abnormal: e.abnormal,
                    payload: e.payload,
                })
                .collect(),
            fine: req
                .fine
                .into_iter()
                .map(|e| FineEntry {
                    slot: e.slot,
                    trace_id: e.trace_id,
                    created_ts: e.created_ts,
                    offloaded: e.offloaded,
                    executed_on: e.executed_on,
                    origin: e.origin,
                    ok: e.ok,
                    duration_ms: e.duration_ms,
                    payload: e.payload,
                })
                .collect(),
        }
    }
}

async fn upload_batch(
    State(state): State<AppState>,
    Json(req): Json<UploadBatchRequest>,
) -> (StatusCode, Json<Value>) {
    let batch_id = req.batch_id.clone();
    let slots = req.slots.clone();
    let batch: UploadBatch = req.into();

    match state.store.record_batch(&batch).await {
        Ok(BatchOutcome::Inserted) | Ok(BatchOutcome::Duplicate) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "ok": true,
                "received_ts": now_secs(),
                "batch_id": batch_id,
                "slots": slots,
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"ok": false, "error": e.to_string()})),
        ),
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let batches = state.store.count_upload_batches().await.unwrap_or(-1);
    Json(serde_json::json!({
        "status": "ok",
        "db_path": state.cfg.db_path,
        "upload_batches_received": batches,
    }))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/upload_batch", post(upload_batch))
        .route("/health", get(health))
        .with_state(state)
}
