//! Component C: Stage Caller.
//!
//! One named method per stage rather than a generic `call(stage, ...)` —
//! each stage's request body shape differs (`detect` additionally carries
//! the prior slot's baseline) and each is configured with its own URL.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::Config;

/// Uniform result of a stage call. A failed call is not a Rust-level
/// error — it is a data outcome that still gets persisted by the caller.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub ok: bool,
    pub result: Value,
    pub duration_ms: f64,
    pub error: String,
}

impl StageOutcome {
    fn success(result: Value, duration_ms: f64) -> Self {
        Self {
            ok: true,
            result,
            duration_ms,
            error: String::new(),
        }
    }

    fn failure(duration_ms: f64, error: String) -> Self {
        Self {
            ok: false,
            result: Value::Object(Default::default()),
            duration_ms,
            error,
        }
    }
}

pub struct StageCaller {
    client: reqwest::Client,
    est_url: String,
    det_url: String,
    fine_url: String,
    http_timeout: Duration,
    execute_timeout: Duration,
}

impl StageCaller {
    pub fn new(cfg: &Config) -> Self {
        Self::with_urls(
            cfg.est_url.clone(),
            cfg.det_url.clone(),
            cfg.fine_url.clone(),
            cfg.http_timeout,
            cfg.execute_timeout,
        )
    }

    pub fn with_urls(
        est_url: String,
        det_url: String,
        fine_url: String,
        http_timeout: Duration,
        execute_timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .build()
                .expect("failed to build stage caller HTTP client"),
            est_url,
            det_url,
            fine_url,
            http_timeout,
            execute_timeout,
        }
    }

    async fn post(&self, url: &str, body: &Value, timeout: Duration) -> StageOutcome {
        let t0 = Instant::now();

        let response = match self.client.post(url).timeout(timeout).json(body).send().await {
            Ok(r) => r,
            Err(e) => return StageOutcome::failure(elapsed_ms(t0), e.to_string()),
        };
        let response = match response.error_for_status() {
            Ok(r) => r,
            Err(e) => return StageOutcome::failure(elapsed_ms(t0), e.to_string()),
        };
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return StageOutcome::failure(elapsed_ms(t0), e.to_string()),
        };

        let duration_ms = elapsed_ms(t0);
        // A 2xx response that isn't valid JSON still counts as a success —
        // the body is wrapped opaquely rather than treated as a failure.
        match serde_json::from_str::<Value>(&text) {
            Ok(v) => StageOutcome::success(v, duration_ms),
            Err(_) => StageOutcome::success(serde_json::json!({"raw": text}), duration_ms),
        }
    }

    pub async fn call_estimate(&self, slot: i64, trace_id: &str, payload: &Value) -> StageOutcome {
        let body = serde_json::json!({"slot": slot, "trace_id": trace_id, "payload": payload});
        self.post(&self.est_url, &body, self.http_timeout).await
    }

    pub async fn call_detect(
        &self,
        slot: i64,
        trace_id: &str,
        payload: &Value,
        baseline: Option<&Value>,
    ) -> StageOutcome {
        let body = serde_json::json!({
            "slot": slot,
            "trace_id": trace_id,
            "payload": payload,
            "baseline": baseline,
        });
        self.post(&self.det_url, &body, self.http_timeout).await
    }

    pub async fn call_fine(&self, slot: i64, trace_id: &str, payload: &Value) -> StageOutcome {
        let body = serde_json::json!({"slot": slot, "trace_id": trace_id, "payload": payload});
        self.post(&self.fine_url, &body, self.http_timeout).await
    }

    /// Dispatches a fine call to a peer's `/execute` endpoint.
    pub async fn call_execute_remote(
        &self,
        peer_url: &str,
        slot: i64,
        trace_id: &str,
        payload: &Value,
        origin: &str,
    ) -> StageOutcome {
        let url = format!("{}/execute", peer_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "stage": "fine",
            "slot": slot,
            "trace_id": trace_id,
            "payload": payload,
            "origin": origin,
        });
        self.post(&url, &body, self.execute_timeout).await
    }
}

fn elapsed_ms(t0: Instant) -> f64 {
    t0.elapsed().as_secs_f64() * 1000.0
}
