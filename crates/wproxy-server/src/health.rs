//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Sessions currently relaying or setting up.
    pub active_sessions: usize,
    /// Sessions started since boot.
    pub sessions_total: u64,
    /// Target every session dials.
    pub target_url: String,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    active_sessions: usize,
    sessions_total: u64,
    target_url: &str,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        active_sessions,
        sessions_total,
        target_url: target_url.to_string(),
    }
}
