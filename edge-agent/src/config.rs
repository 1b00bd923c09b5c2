//! Environment-derived configuration, frozen once at startup.

use std::time::Duration;

use crate::error::ConfigError;

/// Frozen configuration for one agent process. Built once in `main` via
/// [`load_config`] and shared behind an `Arc` with every task.
#[derive(Debug, Clone)]
pub struct Config {
    pub node_id: String,
    pub node_type: String,

    pub est_url: String,
    pub det_url: String,
    pub fine_url: String,

    pub peers: Vec<String>,
    pub collector_url: String,

    pub db_path: String,
    pub slot_seconds: i64,
    pub upload_every: usize,

    pub http_timeout: Duration,
    pub execute_timeout: Duration,

    pub peer_refresh_interval: Duration,
    pub uploader_check_interval: Duration,
}

impl Config {
    /// The collector's batch-ingest endpoint, derived from `COLLECTOR_URL`.
    pub fn collector_upload_url(&self) -> String {
        format!("{}/upload_batch", self.collector_url.trim_end_matches('/'))
    }
}

fn env_str(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_int(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_float_seconds(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn require_url(name: &str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::MissingUrl(name.to_string()));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::InvalidUrl {
            name: name.to_string(),
            value,
        });
    }
    Ok(value)
}

/// Loads configuration from the process environment, validating the
/// handful of conditions that are fatal at startup rather than discoverable
/// only on first stage call.
pub fn load_config() -> Result<Config, ConfigError> {
    let est_url = require_url("EST_URL", env_str("EST_URL", "http://127.0.0.1:8001/estimate"))?;
    let det_url = require_url("DET_URL", env_str("DET_URL", "http://127.0.0.1:8002/detect"))?;
    let fine_url = require_url("FINE_URL", env_str("FINE_URL", "http://127.0.0.1:8003/fine"))?;
    let collector_url = require_url(
        "COLLECTOR_URL",
        env_str("COLLECTOR_URL", "http://127.0.0.1:9000"),
    )?;

    let slot_seconds = env_int("SLOT_SECONDS", 300);
    if slot_seconds <= 0 {
        return Err(ConfigError::NonPositiveSlotSeconds(slot_seconds));
    }

    let upload_every = env_int("UPLOAD_EVERY", 10);
    if upload_every <= 0 {
        return Err(ConfigError::NonPositiveUploadEvery(upload_every));
    }

    Ok(Config {
        node_id: env_str("NODE_ID", "edge-node"),
        node_type: env_str("NODE_TYPE", "sensor"),
        est_url,
        det_url,
        fine_url,
        peers: env_list("PEERS"),
        collector_url,
        db_path: env_str("DB_PATH", "edge_agent.db"),
        slot_seconds,
        upload_every: upload_every as usize,
        http_timeout: Duration::from_secs_f64(env_float_seconds("HTTP_TIMEOUT", 5.0)),
        execute_timeout: Duration::from_secs_f64(env_float_seconds("EXECUTE_TIMEOUT", 5.0)),
        peer_refresh_interval: Duration::from_secs_f64(env_float_seconds(
            "PEER_REFRESH_SECONDS",
            10.0,
        )),
        uploader_check_interval: Duration::from_secs_f64(env_float_seconds(
            "UPLOADER_CHECK_SECONDS",
            5.0,
        )),
    })
}
