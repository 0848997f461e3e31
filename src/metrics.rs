//! Prometheus metrics recorder and name constants.
//!
//! The hub records counters and gauges through the `metrics` facade; the
//! server binary installs a Prometheus recorder once at startup and the
//! `/metrics` route renders the text exposition from its handle.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    tracing::info!("prometheus metrics recorder installed");
    handle
}

/// Build a recorder without installing it globally (tests, embedding).
pub fn build_recorder() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

// Metric name constants to avoid typos across modules.

/// Connections opened total (counter, labels: tier).
pub const HUB_CONNECTIONS_TOTAL: &str = "hub_connections_total";
/// Disconnections total (counter, labels: tier).
pub const HUB_DISCONNECTIONS_TOTAL: &str = "hub_disconnections_total";
/// Active connections (gauge, labels: tier).
pub const HUB_CONNECTIONS_ACTIVE: &str = "hub_connections_active";
/// Per-connection errors total (counter, labels: tier).
pub const HUB_ERRORS_TOTAL: &str = "hub_errors_total";
/// Liveness terminations total (counter, labels: tier).
pub const HUB_LIVENESS_TERMINATIONS_TOTAL: &str = "hub_liveness_terminations_total";
/// Inbound messages dispatched total (counter, labels: tier, kind).
pub const HUB_MESSAGES_TOTAL: &str = "hub_messages_total";
/// Broadcast recipients reached total (counter).
pub const HUB_BROADCAST_RECIPIENTS_TOTAL: &str = "hub_broadcast_recipients_total";
/// Fallback-tier usage total (counter, labels: reason).
pub const FALLBACK_TOTAL: &str = "fallback_total";

/// Reason code for a fallback counter increment: plain HTTP echo.
pub const REASON_MESSAGE_SENT_VIA_HTTP: &str = "message_sent_via_http";
/// Reason code for a fallback counter increment: SSE stream opened.
pub const REASON_SSE_CONNECTED: &str = "sse_connected";
/// Reason code for a fallback counter increment: SSE stream closed.
pub const REASON_SSE_DISCONNECTED: &str = "sse_disconnected";
