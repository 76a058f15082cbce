//! Prometheus metrics recorder and server-level metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::{Result, ServerError};

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at startup, before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle that is not installed globally. Renders nothing; used when a
/// recorder is already installed or in tests.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

// Metric name constants for this crate. Hub and breaker metrics are named
// in their own crates.

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "feedwire_ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "feedwire_ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "feedwire_ws_connections_active";
/// Upgrades refused (counter, labels: reason).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "feedwire_ws_connections_rejected_total";
/// Connection lifetime (histogram, seconds).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "feedwire_ws_connection_duration_seconds";
/// Feed polls (counter, labels: feed, outcome).
pub const FEED_POLLS_TOTAL: &str = "feedwire_feed_polls_total";
/// Feed poll duration (histogram, labels: feed).
pub const FEED_POLL_DURATION_SECONDS: &str = "feedwire_feed_poll_duration_seconds";
