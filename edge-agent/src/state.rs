//! Shared runtime state: ingest queue, slot frontier, caches, EWMAs, peers.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, Mutex, MutexGuard, Notify};

use crate::ewma::Ewma;
use crate::peer::PeerState;

/// Bounded ingest queue capacity. Not configurable: the original treats
/// this as a fixed backpressure point, not an operator-tunable parameter.
pub const INGEST_QUEUE_CAPACITY: usize = 2000;

/// Slots older than `active_slot - CACHE_PRUNE_HORIZON` are dropped from
/// the payload cache and first-sight-detect bookkeeping on every
/// advancement, bounding memory for a long-running agent.
pub const CACHE_PRUNE_HORIZON: i64 = 50;

const EWMA_STAGES: [&str; 4] = ["estimate", "detect", "fine", "fine_remote"];

#[derive(Debug, Clone)]
pub struct IngestItem {
    pub slot: i64,
    pub event_time: f64,
    pub trace_id: String,
    pub payload: serde_json::Value,
}

/// Everything guarded by `AgentState`'s single mutex. Kept small and never
/// held across an `.await` on outbound I/O.
pub struct SharedState {
    pub active_slot: Option<i64>,
    pub slot_payload_cache: HashMap<i64, serde_json::Value>,
    pub detect_done_for_slot: HashMap<i64, bool>,
    pub ewma: HashMap<&'static str, Ewma>,
    pub in_flight: i64,
    pub peers: HashMap<String, PeerState>,
}

impl SharedState {
    fn new(peers: &[String]) -> Self {
        let mut ewma = HashMap::new();
        for stage in EWMA_STAGES {
            ewma.insert(stage, Ewma::new());
        }
        let peers = peers
            .iter()
            .map(|p| (p.clone(), PeerState::new(p.clone())))
            .collect();
        Self {
            active_slot: None,
            slot_payload_cache: HashMap::new(),
            detect_done_for_slot: HashMap::new(),
            ewma,
            in_flight: 0,
            peers,
        }
    }

    /// Drops cache entries for slots strictly older than `cutoff`.
    pub fn prune_before(&mut self, cutoff: i64) {
        self.slot_payload_cache.retain(|&s, _| s >= cutoff);
        self.detect_done_for_slot.retain(|&s, _| s >= cutoff);
    }
}

/// Owns the ingest channel, the shared mutex, and the upload-wake signal
/// for one agent process.
pub struct AgentState {
    pub started_ts: f64,
    inner: Mutex<SharedState>,
    ingest_tx: mpsc::Sender<IngestItem>,
    ingest_rx: Mutex<Option<mpsc::Receiver<IngestItem>>>,
    pub upload_event: Notify,
}

impl AgentState {
    pub fn new(peers: &[String]) -> Self {
        let (ingest_tx, ingest_rx) = mpsc::channel(INGEST_QUEUE_CAPACITY);
        Self {
            started_ts: now_secs(),
            inner: Mutex::new(SharedState::new(peers)),
            ingest_tx,
            ingest_rx: Mutex::new(Some(ingest_rx)),
            upload_event: Notify::new(),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.inner.lock().await
    }

    /// Current ingest queue depth, derived from the bounded channel's spare
    /// capacity rather than a separate counter.
    pub fn queue_len(&self) -> usize {
        INGEST_QUEUE_CAPACITY - self.ingest_tx.capacity()
    }

    /// Enqueues an item without blocking. Returns the item back on a full
    /// or closed channel so the caller can report backpressure.
    pub fn try_enqueue(&self, item: IngestItem) -> Result<(), IngestItem> {
        self.ingest_tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(item) => item,
            mpsc::error::TrySendError::Closed(item) => item,
        })
    }

    /// Hands the receiver to the ingest worker task. Panics if called more
    /// than once — there is exactly one worker per process.
    pub async fn take_receiver(&self) -> mpsc::Receiver<IngestItem> {
        self.ingest_rx
            .lock()
            .await
            .take()
            .expect("ingest receiver already taken")
    }
}

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
