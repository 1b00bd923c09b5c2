//! Small shared helpers. The collector has no in-memory runtime state to
//! coordinate — unlike the edge agent, every request is independent — so
//! this module is just the wall-clock helper the store needs.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
