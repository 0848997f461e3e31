//! External Collaborators
//!
//! The hub never persists, validates, or renders anything itself; the audit
//! trail and user-facing notifications belong to external services reached
//! through the narrow interfaces here. Every call is fire-and-forget:
//! failures are logged and never propagated back to a connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// One audit row describing a hub lifecycle event.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// What happened (e.g. "connect", "disconnect", "liveness_timeout").
    pub action: String,
    /// Transport tier label the event originated from.
    pub tier: &'static str,
    /// Connection the event concerns, when there is one.
    pub connection_id: Option<String>,
    /// Free-form context.
    pub detail: Option<Value>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: &str, tier: &'static str) -> Self {
        Self {
            action: action.to_string(),
            tier,
            connection_id: None,
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn connection(mut self, id: &str) -> Self {
        self.connection_id = Some(id.to_string());
        self
    }

    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Append-only audit log collaborator.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn create(&self, event: AuditEvent) -> Result<(), CollaboratorError>;
}

/// Notification delivery collaborator.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, recipient: &str, message: Value) -> Result<(), CollaboratorError>;
}

/// Errors surfaced by collaborator implementations.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Collaborator rejected the call: {0}")]
    Rejected(String),
}

/// Default audit sink: structured log lines through `tracing`.
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn create(&self, event: AuditEvent) -> Result<(), CollaboratorError> {
        tracing::info!(
            action = %event.action,
            tier = event.tier,
            connection_id = event.connection_id.as_deref().unwrap_or("-"),
            detail = ?event.detail,
            "audit"
        );
        Ok(())
    }
}

/// Default dispatcher: logs the notification instead of delivering it.
pub struct LogNotificationDispatcher;

#[async_trait]
impl NotificationDispatcher for LogNotificationDispatcher {
    async fn dispatch(&self, recipient: &str, message: Value) -> Result<(), CollaboratorError> {
        tracing::info!(recipient, message = %message, "notification dispatched");
        Ok(())
    }
}

/// Record an audit event without blocking the caller.
///
/// The write runs on its own task; a failing sink is logged and forgotten.
pub fn record(sink: &Arc<dyn AuditSink>, event: AuditEvent) {
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        if let Err(e) = sink.create(event).await {
            tracing::warn!(error = %e, "audit sink write failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        created: AtomicUsize,
    }

    #[async_trait]
    impl AuditSink for CountingSink {
        async fn create(&self, _event: AuditEvent) -> Result<(), CollaboratorError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn create(&self, _event: AuditEvent) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::Unavailable("down".into()))
        }
    }

    #[test]
    fn test_event_builder() {
        let event = AuditEvent::new("connect", "websocket")
            .connection("c1")
            .detail(json!({"path": "/ws"}));

        assert_eq!(event.action, "connect");
        assert_eq!(event.tier, "websocket");
        assert_eq!(event.connection_id.as_deref(), Some("c1"));
        assert_eq!(event.detail.unwrap()["path"], "/ws");
    }

    #[tokio::test]
    async fn test_record_is_fire_and_forget() {
        let sink = Arc::new(CountingSink {
            created: AtomicUsize::new(0),
        });
        let dyn_sink: Arc<dyn AuditSink> = sink.clone();

        record(&dyn_sink, AuditEvent::new("connect", "websocket"));
        record(&dyn_sink, AuditEvent::new("disconnect", "websocket"));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(sink.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_record_swallows_sink_failure() {
        let sink: Arc<dyn AuditSink> = Arc::new(FailingSink);
        // Must not panic or propagate.
        record(&sink, AuditEvent::new("connect", "websocket"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_log_collaborators_accept_calls() {
        let sink = LogAuditSink;
        sink.create(AuditEvent::new("connect", "sse")).await.unwrap();

        let dispatcher = LogNotificationDispatcher;
        dispatcher
            .dispatch("client-1", json!({"type": "system"}))
            .await
            .unwrap();
    }
}
