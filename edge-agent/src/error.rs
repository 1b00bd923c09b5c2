//! Error types for the edge agent's own boundaries.
//!
//! Stage-call failures are not modeled as errors here — they are a data
//! outcome (`stage_caller::StageOutcome`) that still gets persisted. These
//! enums cover the two places a Rust-level error actually belongs: config
//! validation at startup and the durable store.

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required URL for {0}")]
    MissingUrl(String),
    #[error("invalid URL for {name}: {value:?}")]
    InvalidUrl { name: String, value: String },
    #[error("SLOT_SECONDS must be positive, got {0}")]
    NonPositiveSlotSeconds(i64),
    #[error("UPLOAD_EVERY must be positive, got {0}")]
    NonPositiveUploadEvery(i64),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to (de)serialize row payload: {0}")]
    Serialize(#[from] serde_json::Error),
}
