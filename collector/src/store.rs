//! Collector durable store.
//!
//! Mirrors the per-node tables the edge agent exports, keyed by
//! `(node_id, slot)`, plus a `upload_batches` table keyed by `batch_id`
//! that makes accepting the same batch twice a no-op — the collector's
//! half of the agent's at-least-once upload guarantee (spec §8, S6).

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};

use serde_json::Value;

use crate::error::StoreError;
use crate::state::now_secs;

#[derive(Debug, Clone)]
pub struct BaselineEntry {
    pub slot: i64,
    pub trace_id: String,
    pub created_ts: f64,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct DetectEntry {
    pub slot: i64,
    pub trace_id: String,
    pub created_ts: f64,
    pub abnormal: bool,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct FineEntry {
    pub slot: i64,
    pub trace_id: String,
    pub created_ts: f64,
    pub offloaded: bool,
    pub executed_on: String,
    pub origin: String,
    pub ok: bool,
    pub duration_ms: f64,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct UploadBatch {
    pub batch_id: String,
    pub sent_ts: f64,
    pub node_id: String,
    pub node_type: String,
    pub slots: Vec<i64>,
    pub baseline: Vec<BaselineEntry>,
    pub detect: Vec<DetectEntry>,
    pub fine: Vec<FineEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// First time this `batch_id` was seen; rows were written.
    Inserted,
    /// This `batch_id` was already recorded; nothing was written.
    Duplicate,
}

pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    pub async fn open(db_path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS upload_batches (
                batch_id TEXT PRIMARY KEY,
                node_id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                sent_ts REAL NOT NULL,
                received_ts REAL NOT NULL,
                slots_json TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS baseline_all (
                node_id TEXT NOT NULL,
                slot INTEGER NOT NULL,
                trace_id TEXT NOT NULL,
                created_ts REAL NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (node_id, slot)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS detect_all (
                node_id TEXT NOT NULL,
                slot INTEGER NOT NULL,
                trace_id TEXT NOT NULL,
                created_ts REAL NOT NULL,
                abnormal INTEGER NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (node_id, slot)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fine_all (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id TEXT NOT NULL,
                slot INTEGER NOT NULL,
                trace_id TEXT NOT NULL,
                created_ts REAL NOT NULL,
                offloaded INTEGER NOT NULL,
                executed_on TEXT NOT NULL,
                origin TEXT NOT NULL,
                ok INTEGER NOT NULL,
                duration_ms REAL NOT NULL,
                payload_json TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_fine_all_node_slot ON fine_all(node_id, slot)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Records a batch, upserting baseline/detect rows and appending fine
    /// rows. A `batch_id` already present is a no-op: returns
    /// `BatchOutcome::Duplicate` without touching any `*_all` table.
    pub async fn record_batch(&self, batch: &UploadBatch) -> Result<BatchOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let slots_json = serde_json::to_string(&batch.slots)?;
        let received_ts = now_secs();
        let insert = sqlx::query(
            "INSERT OR IGNORE INTO upload_batches
                (batch_id, node_id, node_type, sent_ts, received_ts, slots_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&batch.batch_id)
        .bind(&batch.node_id)
        .bind(&batch.node_type)
        .bind(batch.sent_ts)
        .bind(received_ts)
        .bind(slots_json)
        .execute(&mut *tx)
        .await?;

        if insert.rows_affected() == 0 {
            // batch_id already recorded; roll back and short-circuit.
            tx.rollback().await?;
            return Ok(BatchOutcome::Duplicate);
        }

        for entry in &batch.baseline {
            let payload_json = serde_json::to_string(&entry.payload)?;
            sqlx::query(
                "INSERT INTO baseline_all (node_id, slot, trace_id, created_ts, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(node_id, slot) DO UPDATE SET
                    trace_id = excluded.trace_id,
                    created_ts = excluded.created_ts,
                    payload_json = excluded.payload_json",
            )
            .bind(&batch.node_id)
            .bind(entry.slot)
            .bind(&entry.trace_id)
            .bind(entry.created_ts)
            .bind(payload_json)
            .execute(&mut *tx)
            .await?;
        }

        for entry in &batch.detect {
            let payload_json = serde_json::to_string(&entry.payload)?;
            sqlx::query(
                "INSERT INTO detect_all (node_id, slot, trace_id, created_ts, abnormal, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(node_id, slot) DO UPDATE SET
                    trace_id = excluded.trace_id,
                    created_ts = excluded.created_ts,
                    abnormal = excluded.abnormal,
                    payload_json = excluded.payload_json",
            )
            .bind(&batch.node_id)
            .bind(entry.slot)
            .bind(&entry.trace_id)
            .bind(entry.created_ts)
            .bind(entry.abnormal)
            .bind(payload_json)
            .execute(&mut *tx)
            .await?;
        }

        for entry in &batch.fine {
            let payload_json = serde_json::to_string(&entry.payload)?;
            sqlx::query(
                "INSERT INTO fine_all
                    (node_id, slot, trace_id, created_ts, offloaded, executed_on, origin, ok, duration_ms, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .bind(&batch.node_id)
            .bind(entry.slot)
            .bind(&entry.trace_id)
            .bind(entry.created_ts)
            .bind(entry.offloaded)
            .bind(&entry.executed_on)
            .bind(&entry.origin)
            .bind(entry.ok)
            .bind(entry.duration_ms)
            .bind(payload_json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(BatchOutcome::Inserted)
    }

    pub async fn count_upload_batches(&self) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM upload_batches")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn count_baseline_rows(&self, node_id: &str, slot: i64) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM baseline_all WHERE node_id = ?1 AND slot = ?2",
        )
        .bind(node_id)
        .bind(slot)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn count_fine_rows(&self, node_id: &str, slot: i64) -> Result<i64, StoreError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM fine_all WHERE node_id = ?1 AND slot = ?2")
                .bind(node_id)
                .bind(slot)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }
}
