//! HTTP route handlers: `/ingest`, `/execute`, `/health`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::Config;
use crate::orchestrator::serve_remote_fine;
use crate::slot::slot_of;
use crate::state::{now_secs, AgentState};
use crate::stage_caller::StageCaller;
use crate::store::Store;

/// Everything a route handler needs. Cheap to clone: every field is an
/// `Arc`, matching the teacher's `Arc<PredictionService>` state extractor.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub agent_state: Arc<AgentState>,
    pub store: Arc<Store>,
    pub caller: Arc<StageCaller>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default = "default_payload")]
    pub payload: Value,
    pub trace_id: Option<String>,
    pub event_time: Option<f64>,
}

fn default_payload() -> Value {
    serde_json::json!({})
}

async fn ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> (StatusCode, Json<Value>) {
    let event_time = req.event_time.unwrap_or_else(now_secs);
    let slot = slot_of(event_time, state.cfg.slot_seconds);
    let trace_id = req.trace_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let item = crate::state::IngestItem {
        slot,
        event_time,
        trace_id: trace_id.clone(),
        payload: req.payload,
    };

    match state.agent_state.try_enqueue(item) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "accepted": true,
                "slot": slot,
                "trace_id": trace_id,
                "queue_len": state.agent_state.queue_len(),
            })),
        ),
        Err(_rejected) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "accepted": false,
                "error": "queue full",
            })),
        ),
    }
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub stage: String,
    pub slot: i64,
    #[serde(default = "default_payload")]
    pub payload: Value,
    pub trace_id: String,
    pub origin: String,
}

async fn execute(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> (StatusCode, Json<Value>) {
    if req.stage != "fine" {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "ok": false,
                "error": format!("unsupported stage: {}", req.stage),
            })),
        );
    }

    let outcome = match serve_remote_fine(
        &state.cfg,
        &state.agent_state,
        &state.store,
        &state.caller,
        req.slot,
        &req.trace_id,
        &req.payload,
        &req.origin,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"ok": false, "error": e.to_string()})),
            )
        }
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "ok": outcome.ok,
            "executed_on": state.cfg.node_id,
            "slot": req.slot,
            "trace_id": req.trace_id,
            "duration_ms": outcome.duration_ms,
            "result": outcome.result,
            "error": outcome.error,
        })),
    )
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let shared = state.agent_state.lock().await;

    let avg_ms: serde_json::Map<String, Value> = shared
        .ewma
        .iter()
        .map(|(stage, ewma)| ((*stage).to_string(), serde_json::json!(ewma.value())))
        .collect();

    let peers: serde_json::Map<String, Value> = shared
        .peers
        .iter()
        .map(|(url, peer)| (url.clone(), serde_json::to_value(peer).unwrap_or(Value::Null)))
        .collect();

    Json(serde_json::json!({
        "node_id": state.cfg.node_id,
        "node_type": state.cfg.node_type,
        "started_ts": state.agent_state.started_ts,
        "active_slot": shared.active_slot,
        "queue_len": state.agent_state.queue_len(),
        "in_flight": shared.in_flight,
        "avg_ms": Value::Object(avg_ms),
        "peers": Value::Object(peers),
    }))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/execute", post(execute))
        .route("/health", get(health))
        .with_state(state)
}
