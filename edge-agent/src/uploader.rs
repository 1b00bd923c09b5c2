//! Component F: Batch Uploader.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::state::{now_secs, AgentState};
use crate::store::{BatchExport, Store};

/// Races `upload_event` against a fixed timer, matching
/// `asyncio.wait_for(asyncio.shield(...))` in the original: whichever
/// fires first wakes the loop to re-check for a full batch.
pub async fn run_uploader_loop(cfg: Arc<Config>, state: Arc<AgentState>, store: Arc<Store>) {
    let client = reqwest::Client::builder()
        .build()
        .expect("failed to build uploader HTTP client");

    loop {
        wait_for_wake(&state, cfg.uploader_check_interval).await;

        let slots = match store.list_unuploaded_slots().await {
            Ok(slots) => slots,
            Err(e) => {
                warn!(error = %e, "failed to list unuploaded slots");
                continue;
            }
        };

        if slots.len() < cfg.upload_every {
            continue;
        }

        let batch_slots: Vec<i64> = slots.into_iter().take(cfg.upload_every).collect();
        let batch_id = Uuid::new_v4().to_string();

        let export = match store.export_batch(&batch_slots).await {
            Ok(export) => export,
            Err(e) => {
                warn!(error = %e, batch_id, "failed to export batch, will retry next wake");
                continue;
            }
        };

        upload_batch(&client, &cfg, &store, &batch_id, &batch_slots, &export).await;
    }
}

async fn wait_for_wake(state: &AgentState, check_interval: Duration) {
    tokio::select! {
        _ = state.upload_event.notified() => {}
        _ = tokio::time::sleep(check_interval) => {}
    }
}

async fn upload_batch(
    client: &reqwest::Client,
    cfg: &Config,
    store: &Store,
    batch_id: &str,
    batch_slots: &[i64],
    export: &BatchExport,
) {
    let body = build_batch_payload(cfg, batch_id, batch_slots, export);

    let response = client
        .post(cfg.collector_upload_url())
        .timeout(cfg.execute_timeout)
        .json(&body)
        .send()
        .await;

    match response {
        Ok(resp) if resp.status().is_success() => {
            if let Err(e) = store.mark_uploaded(batch_slots, batch_id).await {
                warn!(error = %e, batch_id, "uploaded batch but failed to mark slots, will retry next wake");
            } else {
                info!(batch_id, slots = batch_slots.len(), "batch uploaded");
            }
        }
        Ok(resp) => {
            warn!(status = %resp.status(), batch_id, "collector rejected batch, will retry next wake");
        }
        Err(e) => {
            warn!(error = %e, batch_id, "failed to reach collector, will retry next wake");
        }
    }
}

fn build_batch_payload(
    cfg: &Config,
    batch_id: &str,
    slots: &[i64],
    export: &BatchExport,
) -> serde_json::Value {
    serde_json::json!({
        "batch_id": batch_id,
        "sent_ts": now_secs(),
        "node_id": cfg.node_id,
        "node_type": cfg.node_type,
        "slots": slots,
        "baseline": export.baseline.iter().map(|r| serde_json::json!({
            "slot": r.slot,
            "trace_id": r.trace_id,
            "created_ts": r.created_ts,
            "payload": r.payload,
        })).collect::<Vec<_>>(),
        "detect": export.detect.iter().map(|r| serde_json::json!({
            "slot": r.slot,
            "trace_id": r.trace_id,
            "created_ts": r.created_ts,
            "abnormal": r.abnormal,
            "payload": r.payload,
        })).collect::<Vec<_>>(),
        "fine": export.fine.iter().map(|r| serde_json::json!({
            "slot": r.slot,
            "trace_id": r.trace_id,
            "created_ts": r.created_ts,
            "offloaded": r.offloaded,
            "executed_on": r.executed_on,
            "origin": r.origin,
            "ok": r.ok,
            "duration_ms": r.duration_ms,
            "payload": r.payload,
        })).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn batch_payload_carries_node_identity_and_slots() {
        let cfg = Config {
            node_id: "node-a".to_string(),
            node_type: "sensor".to_string(),
            est_url: "http://unused".to_string(),
            det_url: "http://unused".to_string(),
            fine_url: "http://unused".to_string(),
            peers: vec![],
            collector_url: "http://collector".to_string(),
            db_path: ":memory:".to_string(),
            slot_seconds: 300,
            upload_every: 10,
            http_timeout: Duration::from_secs(2),
            execute_timeout: Duration::from_secs(2),
            peer_refresh_interval: Duration::from_secs(10),
            uploader_check_interval: Duration::from_secs(5),
        };
        let export = BatchExport::default();

        let payload = build_batch_payload(&cfg, "batch-1", &[1, 2], &export);

        assert_eq!(payload["node_id"], json!("node-a"));
        assert_eq!(payload["batch_id"], json!("batch-1"));
        assert_eq!(payload["slots"], json!([1, 2]));
        assert_eq!(payload["baseline"], json!([]));
    }
}
