//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections opened (counter).
pub const CONNECTIONS_OPENED_TOTAL: &str = "ws_connections_total";
/// WebSocket connections closed (counter).
pub const CONNECTIONS_CLOSED_TOTAL: &str = "ws_disconnections_total";
/// Connections refused because the session pool was full (counter).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Live WebSocket connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Replies dropped on a full outbound queue (counter).
pub const OUTBOUND_DROPS_TOTAL: &str = "ws_outbound_drops_total";
/// Inbound envelopes handled (counter, labels: action).
pub const MESSAGES_DISPATCHED_TOTAL: &str = "messages_dispatched_total";
/// Error envelopes sent (counter, labels: code).
pub const ERROR_REPLIES_TOTAL: &str = "error_replies_total";
