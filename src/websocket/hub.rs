//! Persistent-Socket Connection Hub
//!
//! Owns the PersistentSocket tier's registry: one entry per live WebSocket,
//! created when the upgrade completes and removed on close, transport error,
//! or liveness timeout. The heartbeat supervisor drives `probe_cycle` on a
//! fixed interval; everything else here is called from the socket handler.

use std::sync::Arc;

use metrics::{counter, gauge};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audit::{self, AuditEvent, AuditSink};
use crate::config::WebSocketConfig;
use crate::metrics as names;
use crate::registry::{Frame, HubError, Registry, Transport};

/// Manager for one persistent-socket hub endpoint.
///
/// Each configured hub path gets its own `SocketHub` with an isolated
/// registry, so feature-specific endpoints never share connection state.
pub struct SocketHub {
    /// Endpoint identity announced to clients on connect (the mount path).
    endpoint: String,
    registry: Registry,
    audit: Arc<dyn AuditSink>,
    probe_interval: std::time::Duration,
    heartbeat_interval: std::time::Duration,
}

impl SocketHub {
    pub fn new(endpoint: &str, config: &WebSocketConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            registry: Registry::new(Transport::PersistentSocket, config.max_connections),
            audit,
            probe_interval: std::time::Duration::from_secs(config.probe_interval_secs),
            heartbeat_interval: std::time::Duration::from_secs(config.heartbeat_interval_secs),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn probe_interval(&self) -> std::time::Duration {
        self.probe_interval
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        self.heartbeat_interval
    }

    /// Register a new WebSocket connection.
    ///
    /// Returns the connection ID on success, or an error if the connection
    /// limit has been reached.
    pub async fn register(
        &self,
        sender: mpsc::UnboundedSender<Frame>,
    ) -> Result<String, HubError> {
        let id = self.registry.register(None, sender).await?;

        counter!(names::HUB_CONNECTIONS_TOTAL, "tier" => "websocket").increment(1);
        gauge!(names::HUB_CONNECTIONS_ACTIVE, "tier" => "websocket").increment(1.0);
        audit::record(
            &self.audit,
            AuditEvent::new("connect", "websocket").connection(&id),
        );

        tracing::info!(connection_id = %id, endpoint = %self.endpoint, "WebSocket connected");
        Ok(id)
    }

    /// Unregister a connection and cancel its timers.
    pub async fn unregister(&self, id: &str) {
        if self.registry.unregister(id).await {
            counter!(names::HUB_DISCONNECTIONS_TOTAL, "tier" => "websocket").increment(1);
            gauge!(names::HUB_CONNECTIONS_ACTIVE, "tier" => "websocket").decrement(1.0);
            audit::record(
                &self.audit,
                AuditEvent::new("disconnect", "websocket").connection(id),
            );
            tracing::info!(connection_id = %id, endpoint = %self.endpoint, "WebSocket disconnected");
        }
    }

    /// Push an envelope to a specific connection.
    pub async fn send_envelope(&self, id: &str, envelope: Value) -> Result<(), HubError> {
        self.registry.send_to(id, Frame::Envelope(envelope)).await
    }

    /// Record a liveness acknowledgement from the client's transport layer.
    pub async fn ack(&self, id: &str) {
        self.registry.ack(id).await;
    }

    /// Refresh `last_seen_at` on inbound traffic.
    pub async fn touch(&self, id: &str) {
        self.registry.touch(id).await;
    }

    /// Attach a timer to a connection so closing the connection cancels it.
    pub async fn attach_timer(&self, id: &str, timer: JoinHandle<()>) {
        self.registry.attach_timer(id, timer).await;
    }

    /// One heartbeat supervisor cycle (mark-then-check).
    ///
    /// Terminations are fatal and non-retried; the ids removed this cycle
    /// are reported to metrics and the audit sink.
    pub async fn probe_cycle(&self) -> Vec<String> {
        let terminated = self.registry.probe_cycle().await;

        for id in &terminated {
            counter!(names::HUB_LIVENESS_TERMINATIONS_TOTAL, "tier" => "websocket").increment(1);
            counter!(names::HUB_DISCONNECTIONS_TOTAL, "tier" => "websocket").increment(1);
            gauge!(names::HUB_CONNECTIONS_ACTIVE, "tier" => "websocket").decrement(1.0);
            audit::record(
                &self.audit,
                AuditEvent::new("liveness_timeout", "websocket").connection(id),
            );
            tracing::warn!(
                connection_id = %id,
                endpoint = %self.endpoint,
                "terminated unresponsive connection"
            );
        }

        terminated
    }

    /// Get the current connection count
    pub async fn connection_count(&self) -> usize {
        self.registry.count().await
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.registry.contains(id).await
    }

    /// Close every connection (shutdown path, after the supervisor stops).
    pub async fn drain(&self) {
        let drained = self.registry.drain().await;
        if drained > 0 {
            tracing::info!(endpoint = %self.endpoint, drained, "drained WebSocket registry");
        }
    }
}
