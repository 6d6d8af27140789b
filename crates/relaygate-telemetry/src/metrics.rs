//! Prometheus recorder installation and metric name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

/// Install the global Prometheus recorder.
///
/// Returns `None` if a recorder is already installed in this process.
pub fn install_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("prometheus metrics recorder installed");
            Some(handle)
        }
        Err(e) => {
            warn!(error = %e, "failed to install metrics recorder");
            None
        }
    }
}

// Metric name constants to avoid typos across crates.

/// Sessions created (counter).
pub const SESSIONS_CREATED_TOTAL: &str = "sessions_created_total";
/// Sessions currently registered (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// State transitions (counter, labels: state).
pub const SESSION_TRANSITIONS_TOTAL: &str = "session_transitions_total";
/// Automatic reinitializations after a disconnect (counter).
pub const SESSION_RECONNECTS_TOTAL: &str = "session_reconnects_total";
/// Inbound messages seen (counter, labels: outcome).
pub const INBOUND_MESSAGES_TOTAL: &str = "inbound_messages_total";
/// Webhook deliveries (counter, labels: outcome).
pub const WEBHOOK_DELIVERIES_TOTAL: &str = "webhook_deliveries_total";
/// Webhook delivery duration seconds (histogram).
pub const WEBHOOK_DURATION_SECONDS: &str = "webhook_duration_seconds";
/// Outbound sends (counter, labels: outcome).
pub const OUTBOUND_SENDS_TOTAL: &str = "outbound_sends_total";
/// Events dropped because an observer lagged (counter).
pub const OBSERVER_DROPS_TOTAL: &str = "observer_drops_total";
/// Connected WebSocket observers (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
