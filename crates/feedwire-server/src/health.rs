//! `/health` endpoint.

use std::time::Instant;

use feedwire_breaker::{Health, HealthReport};
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"degraded"` when half or more of the breakers are open.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count.
    pub connections: usize,
    /// Sessions registered with the hub.
    pub sessions: usize,
    /// Aggregated breaker health.
    pub breakers: HealthReport,
}

impl HealthResponse {
    /// Whether the service should be reported as healthy.
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    sessions: usize,
    breakers: HealthReport,
) -> HealthResponse {
    let status = if breakers.status == Health::Critical {
        "degraded"
    } else {
        "ok"
    };
    HealthResponse {
        status,
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        sessions,
        breakers,
    }
}
