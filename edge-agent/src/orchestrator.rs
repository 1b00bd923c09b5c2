//! Component E: Slot Orchestrator.
//!
//! One ingest worker consumes the queue serially, which keeps slot
//! advancement and first-sight-detect deterministic without fine-grained
//! locking — the single `AgentState` mutex is only ever held across a
//! small read-modify-write, never across a stage call.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::StoreError;
use crate::policy::pick_target_for_fine;
use crate::stage_caller::{StageCaller, StageOutcome};
use crate::state::{AgentState, IngestItem, CACHE_PRUNE_HORIZON};
use crate::store::{NewFine, Store};

/// Sentinel payload key used to force a slot-advancement check without
/// otherwise affecting any slot's cached payload or detect state.
const FLUSH_KEY: &str = "__flush__";

pub async fn run_ingest_worker(
    cfg: Arc<Config>,
    state: Arc<AgentState>,
    store: Arc<Store>,
    caller: Arc<StageCaller>,
    mut rx: mpsc::Receiver<IngestItem>,
) {
    while let Some(item) = rx.recv().await {
        if let Err(e) = process_ingest_item(&cfg, &state, &store, &caller, item).await {
            warn!(error = %e, "ingest item processing failed, continuing");
        }
    }
    info!("ingest worker exiting: channel closed");
}

async fn process_ingest_item(
    cfg: &Config,
    state: &AgentState,
    store: &Store,
    caller: &StageCaller,
    item: IngestItem,
) -> Result<(), StoreError> {
    let is_flush = item
        .payload
        .get(FLUSH_KEY)
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    advance_slot(state, store, caller, item.slot).await?;

    if is_flush {
        return Ok(());
    }

    {
        let mut shared = state.lock().await;
        shared.slot_payload_cache.insert(item.slot, item.payload.clone());
    }

    let first_sight = {
        let mut shared = state.lock().await;
        if *shared.detect_done_for_slot.get(&item.slot).unwrap_or(&false) {
            false
        } else {
            shared.detect_done_for_slot.insert(item.slot, true);
            true
        }
    };

    if first_sight {
        run_detect_and_maybe_fine(cfg, state, store, caller, item.slot, &item.trace_id, &item.payload).await?;
    }

    Ok(())
}

/// Advances `active_slot` to `new_slot`, closing every intervening slot
/// that has a cached payload by running `estimate` on it. A `new_slot`
/// no further ahead than the current frontier is a no-op.
async fn advance_slot(
    state: &AgentState,
    store: &Store,
    caller: &StageCaller,
    new_slot: i64,
) -> Result<(), StoreError> {
    let active = { state.lock().await.active_slot };

    let active = match active {
        None => {
            state.lock().await.active_slot = Some(new_slot);
            return Ok(());
        }
        Some(active) if new_slot <= active => return Ok(()),
        Some(active) => active,
    };

    for s in active..new_slot {
        let cached = { state.lock().await.slot_payload_cache.get(&s).cloned() };
        if let Some(payload) = cached {
            run_estimate(state, store, caller, s, &payload).await?;
            state.upload_event.notify_one();
        }
    }

    let mut shared = state.lock().await;
    shared.active_slot = Some(new_slot);
    shared.prune_before(new_slot - CACHE_PRUNE_HORIZON);
    Ok(())
}

async fn run_estimate(
    state: &AgentState,
    store: &Store,
    caller: &StageCaller,
    slot: i64,
    payload: &serde_json::Value,
) -> Result<(), StoreError> {
    let trace_id = format!("est-{slot}");

    bump_in_flight(state, 1).await;
    let outcome = caller.call_estimate(slot, &trace_id, payload).await;
    bump_in_flight(state, -1).await;
    record_ewma(state, "estimate", outcome.duration_ms).await;

    let stored_payload = failure_wrapped(&outcome);
    store.upsert_baseline(slot, &trace_id, &stored_payload).await
}

async fn run_detect_and_maybe_fine(
    cfg: &Config,
    state: &AgentState,
    store: &Store,
    caller: &StageCaller,
    slot: i64,
    trace_id: &str,
    payload: &serde_json::Value,
) -> Result<(), StoreError> {
    let baseline = store.get_baseline(slot - 1).await?;

    bump_in_flight(state, 1).await;
    let outcome = caller.call_detect(slot, trace_id, payload, baseline.as_ref()).await;
    bump_in_flight(state, -1).await;
    record_ewma(state, "detect", outcome.duration_ms).await;

    // A failed detect call still persists a row; abnormal defaults to
    // false so a broken detect stage never silently triggers fine.
    let abnormal = outcome.ok
        && outcome
            .result
            .get("abnormal")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
    let stored_payload = failure_wrapped(&outcome);

    store.upsert_detect(slot, trace_id, abnormal, &stored_payload).await?;

    if abnormal {
        run_fine_with_offload(cfg, state, store, caller, slot, trace_id, payload).await?;
    }

    Ok(())
}

/// Tries a peer's `/execute` first. A successful remote call is recorded
/// and the dispatch is done — no local fallback. Only when there is no
/// eligible peer, or the remote call fails, does a local `fine` call run
/// (the failed remote attempt is still recorded as its own FineRow before
/// the fallback).
async fn run_fine_with_offload(
    cfg: &Config,
    state: &AgentState,
    store: &Store,
    caller: &StageCaller,
    slot: i64,
    trace_id: &str,
    payload: &serde_json::Value,
) -> Result<(), StoreError> {
    let peers_snapshot = { state.lock().await.peers.clone() };
    let target = pick_target_for_fine(&peers_snapshot);

    if let Some(target) = target {
        bump_in_flight(state, 1).await;
        let outcome = caller
            .call_execute_remote(&target, slot, trace_id, payload, &cfg.node_id)
            .await;
        bump_in_flight(state, -1).await;
        record_ewma(state, "fine_remote", outcome.duration_ms).await;

        let remote_ok = outcome.ok;
        store
            .insert_fine(NewFine {
                slot,
                trace_id: trace_id.to_string(),
                offloaded: true,
                executed_on: target,
                origin: cfg.node_id.clone(),
                ok: remote_ok,
                duration_ms: outcome.duration_ms,
                payload: failure_wrapped(&outcome),
            })
            .await?;

        if remote_ok {
            return Ok(());
        }
    }

    bump_in_flight(state, 1).await;
    let outcome = caller.call_fine(slot, trace_id, payload).await;
    bump_in_flight(state, -1).await;
    record_ewma(state, "fine", outcome.duration_ms).await;

    store
        .insert_fine(NewFine {
            slot,
            trace_id: trace_id.to_string(),
            offloaded: false,
            executed_on: cfg.node_id.clone(),
            origin: cfg.node_id.clone(),
            ok: outcome.ok,
            duration_ms: outcome.duration_ms,
            payload: failure_wrapped(&outcome),
        })
        .await
}

/// Serves a peer's offloaded `/execute` request by running `fine` locally.
/// The resulting FineRow has `offloaded=true, executed_on=self,
/// origin=<caller>` — "offloaded" records that this invocation arrived
/// over the offload path, not that this node's own scoring chose to
/// offload it (resolved against the original's `execute()` handler, which
/// sets this unconditionally).
pub async fn serve_remote_fine(
    cfg: &Config,
    state: &AgentState,
    store: &Store,
    caller: &StageCaller,
    slot: i64,
    trace_id: &str,
    payload: &serde_json::Value,
    origin: &str,
) -> Result<StageOutcome, StoreError> {
    bump_in_flight(state, 1).await;
    let outcome = caller.call_fine(slot, trace_id, payload).await;
    bump_in_flight(state, -1).await;
    record_ewma(state, "fine", outcome.duration_ms).await;

    store
        .insert_fine(NewFine {
            slot,
            trace_id: trace_id.to_string(),
            offloaded: true,
            executed_on: cfg.node_id.clone(),
            origin: origin.to_string(),
            ok: outcome.ok,
            duration_ms: outcome.duration_ms,
            payload: failure_wrapped(&outcome),
        })
        .await?;

    Ok(outcome)
}

fn failure_wrapped(outcome: &StageOutcome) -> serde_json::Value {
    if outcome.ok {
        outcome.result.clone()
    } else {
        serde_json::json!({"error": outcome.error, "result": outcome.result})
    }
}

async fn bump_in_flight(state: &AgentState, delta: i64) {
    let mut shared = state.lock().await;
    shared.in_flight += delta;
}

async fn record_ewma(state: &AgentState, stage: &'static str, sample_ms: f64) {
    let mut shared = state.lock().await;
    if let Some(ewma) = shared.ewma.get_mut(stage) {
        ewma.update(sample_ms);
    }
}
