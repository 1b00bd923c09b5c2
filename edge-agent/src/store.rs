//! Component B: Durable Store.
//!
//! A single `sqlx::SqlitePool` opened in WAL mode, matching the original
//! agent's `aiosqlite` setup. The orchestrator is the only writer of
//! outcome rows; the uploader and HTTP handlers only read or mark.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, QueryBuilder, Sqlite};

use serde_json::Value;

use crate::error::StoreError;
use crate::state::now_secs;

#[derive(Debug, Clone)]
pub struct BaselineRow {
    pub slot: i64,
    pub trace_id: String,
    pub created_ts: f64,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct DetectRow {
    pub slot: i64,
    pub trace_id: String,
    pub created_ts: f64,
    pub abnormal: bool,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct FineRow {
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

/// Arguments for `Store::insert_fine`, grouped to avoid an unwieldy
/// positional-argument list matching the number of columns on `fine_result`.
#[derive(Debug, Clone)]
pub struct NewFine {
    pub slot: i64,
    pub trace_id: String,
    pub offloaded: bool,
    pub executed_on: String,
    pub origin: String,
    pub ok: bool,
    pub duration_ms: f64,
    pub payload: Value,
}

#[derive(Debug, Clone, Default)]
pub struct BatchExport {
    pub baseline: Vec<BaselineRow>,
    pub detect: Vec<DetectRow>,
    pub fine: Vec<FineRow>,
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
            "CREATE TABLE IF NOT EXISTS baseline (
                slot INTEGER PRIMARY KEY,
                trace_id TEXT NOT NULL,
                created_ts REAL NOT NULL,
                payload_json TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS detect_result (
                slot INTEGER PRIMARY KEY,
                trace_id TEXT NOT NULL,
                created_ts REAL NOT NULL,
                abnormal INTEGER NOT NULL,
                payload_json TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fine_result (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
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
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_fine_result_slot ON fine_result(slot)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS upload_mark (
                slot INTEGER PRIMARY KEY,
                batch_id TEXT NOT NULL,
                uploaded_ts REAL NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_baseline(&self, slot: i64, trace_id: &str, payload: &Value) -> Result<(), StoreError> {
        let payload_json = serde_json::to_string(payload)?;
        let ts = now_secs();
        sqlx::query(
            "INSERT INTO baseline (slot, trace_id, created_ts, payload_json) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(slot) DO UPDATE SET
                trace_id = excluded.trace_id,
                created_ts = excluded.created_ts,
                payload_json = excluded.payload_json",
        )
        .bind(slot)
        .bind(trace_id)
        .bind(ts)
        .bind(payload_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_baseline(&self, slot: i64) -> Result<Option<Value>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT payload_json FROM baseline WHERE slot = ?1")
                .bind(slot)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(json,)| serde_json::from_str(&json).unwrap_or(Value::Null)))
    }

    pub async fn upsert_detect(
        &self,
        slot: i64,
        trace_id: &str,
        abnormal: bool,
        payload: &Value,
    ) -> Result<(), StoreError> {
        let payload_json = serde_json::to_string(payload)?;
        let ts = now_secs();
        sqlx::query(
            "INSERT INTO detect_result (slot, trace_id, created_ts, abnormal, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(slot) DO UPDATE SET
                trace_id = excluded.trace_id,
                created_ts = excluded.created_ts,
                abnormal = excluded.abnormal,
                payload_json = excluded.payload_json",
        )
        .bind(slot)
        .bind(trace_id)
        .bind(ts)
        .bind(abnormal)
        .bind(payload_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_fine(&self, fine: NewFine) -> Result<(), StoreError> {
        let payload_json = serde_json::to_string(&fine.payload)?;
        let ts = now_secs();
        sqlx::query(
            "INSERT INTO fine_result
                (slot, trace_id, created_ts, offloaded, executed_on, origin, ok, duration_ms, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(fine.slot)
        .bind(fine.trace_id)
        .bind(ts)
        .bind(fine.offloaded)
        .bind(fine.executed_on)
        .bind(fine.origin)
        .bind(fine.ok)
        .bind(fine.duration_ms)
        .bind(payload_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Slots that have a baseline row but no upload mark, ascending.
    pub async fn list_unuploaded_slots(&self) -> Result<Vec<i64>, StoreError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT b.slot FROM baseline b
             LEFT JOIN upload_mark u ON b.slot = u.slot
             WHERE u.slot IS NULL
             ORDER BY b.slot ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    pub async fn export_batch(&self, slots: &[i64]) -> Result<BatchExport, StoreError> {
        Ok(BatchExport {
            baseline: self.fetch_baseline_rows(slots).await?,
            detect: self.fetch_detect_rows(slots).await?,
            fine: self.fetch_fine_rows(slots).await?,
        })
    }

    async fn fetch_baseline_rows(&self, slots: &[i64]) -> Result<Vec<BaselineRow>, StoreError> {
        if slots.is_empty() {
            return Ok(vec![]);
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT slot, trace_id, created_ts, payload_json FROM baseline WHERE slot IN (",
        );
        let mut separated = qb.separated(", ");
        for slot in slots {
            separated.push_bind(*slot);
        }
        qb.push(") ORDER BY slot ASC");

        let rows: Vec<(i64, String, f64, String)> =
            qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(slot, trace_id, created_ts, payload_json)| BaselineRow {
                slot,
                trace_id,
                created_ts,
                payload: serde_json::from_str(&payload_json).unwrap_or(Value::Null),
            })
            .collect())
    }

    async fn fetch_detect_rows(&self, slots: &[i64]) -> Result<Vec<DetectRow>, StoreError> {
        if slots.is_empty() {
            return Ok(vec![]);
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT slot, trace_id, created_ts, abnormal, payload_json FROM detect_result WHERE slot IN (",
        );
        let mut separated = qb.separated(", ");
        for slot in slots {
            separated.push_bind(*slot);
        }
        qb.push(") ORDER BY slot ASC");

        let rows: Vec<(i64, String, f64, bool, String)> =
            qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(slot, trace_id, created_ts, abnormal, payload_json)| DetectRow {
                slot,
                trace_id,
                created_ts,
                abnormal,
                payload: serde_json::from_str(&payload_json).unwrap_or(Value::Null),
            })
            .collect())
    }

    async fn fetch_fine_rows(&self, slots: &[i64]) -> Result<Vec<FineRow>, StoreError> {
        if slots.is_empty() {
            return Ok(vec![]);
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT slot, trace_id, created_ts, offloaded, executed_on, origin, ok, duration_ms, payload_json
             FROM fine_result WHERE slot IN (",
        );
        let mut separated = qb.separated(", ");
        for slot in slots {
            separated.push_bind(*slot);
        }
        qb.push(") ORDER BY slot ASC, id ASC");

        let rows: Vec<(i64, String, f64, bool, String, String, bool, f64, String)> =
            qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(
                |(slot, trace_id, created_ts, offloaded, executed_on, origin, ok, duration_ms, payload_json)| FineRow {
                    slot,
                    trace_id,
                    created_ts,
                    offloaded,
                    executed_on,
                    origin,
                    ok,
                    duration_ms,
                    payload: serde_json::from_str(&payload_json).unwrap_or(Value::Null),
                },
            )
            .collect())
    }

    /// Marks every slot in `slots` as uploaded under `batch_id`, atomically.
    pub async fn mark_uploaded(&self, slots: &[i64], batch_id: &str) -> Result<(), StoreError> {
        if slots.is_empty() {
            return Ok(());
        }
        let ts = now_secs();
        let mut tx = self.pool.begin().await?;
        for slot in slots {
            sqlx::query(
                "INSERT OR REPLACE INTO upload_mark (slot, batch_id, uploaded_ts) VALUES (?1, ?2, ?3)",
            )
            .bind(slot)
            .bind(batch_id)
            .bind(ts)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
