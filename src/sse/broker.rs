//! Server-Push Stream Broker
//!
//! Keeps long-lived one-way response streams open. Each stream gets a
//! registry entry keyed by client id so the broadcast entry point can reach
//! it, plus a dedicated heartbeat timer keeping intermediary proxies from
//! timing the stream out. A write to a stream whose transport already
//! closed is not retried; the connection is torn down as if closed.

use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::audit::{self, AuditEvent, AuditSink};
use crate::config::SseConfig;
use crate::metrics as names;
use crate::protocol;
use crate::registry::{Frame, HubError, Registry, Transport};

/// Manager for the server-push stream tier.
pub struct SseBroker {
    registry: Arc<Registry>,
    audit: Arc<dyn AuditSink>,
    heartbeat_interval: std::time::Duration,
}

impl SseBroker {
    pub fn new(config: &SseConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            registry: Arc::new(Registry::new(
                Transport::ServerPushStream,
                config.max_connections,
            )),
            audit,
            heartbeat_interval: std::time::Duration::from_secs(config.heartbeat_interval_secs),
        }
    }

    /// Open a stream: register the send handle, queue the initial
    /// `connected` envelope, and start the heartbeat timer.
    ///
    /// The returned receiver feeds the client's `text/event-stream`
    /// response; dropping it is the disconnect signal.
    pub async fn connect(
        &self,
        client_id: Option<String>,
    ) -> Result<(String, mpsc::UnboundedReceiver<Frame>), HubError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.registry.register(client_id, tx).await?;

        self.registry
            .send_to(&id, Frame::Envelope(protocol::connected(&id)))
            .await?;

        // Heartbeat timer, owned by the registry entry so removal cancels it.
        let registry = Arc::clone(&self.registry);
        let interval = self.heartbeat_interval;
        let heartbeat_id = id.clone();
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let beat = Frame::Envelope(protocol::heartbeat());
                if registry.send_to(&heartbeat_id, beat).await.is_err() {
                    break;
                }
            }
        });
        self.registry.attach_timer(&id, timer).await;

        counter!(names::HUB_CONNECTIONS_TOTAL, "tier" => "sse").increment(1);
        gauge!(names::HUB_CONNECTIONS_ACTIVE, "tier" => "sse").increment(1.0);
        counter!(names::FALLBACK_TOTAL, "reason" => names::REASON_SSE_CONNECTED).increment(1);
        audit::record(&self.audit, AuditEvent::new("connect", "sse").connection(&id));

        tracing::info!(connection_id = %id, "SSE stream opened");
        Ok((id, rx))
    }

    /// Tear a stream down: cancel its heartbeat and remove the entry.
    pub async fn disconnect(&self, id: &str) {
        if self.registry.unregister(id).await {
            counter!(names::HUB_DISCONNECTIONS_TOTAL, "tier" => "sse").increment(1);
            gauge!(names::HUB_CONNECTIONS_ACTIVE, "tier" => "sse").decrement(1.0);
            counter!(names::FALLBACK_TOTAL, "reason" => names::REASON_SSE_DISCONNECTED)
                .increment(1);
            audit::record(&self.audit, AuditEvent::new("disconnect", "sse").connection(id));
            tracing::info!(connection_id = %id, "SSE stream closed");
        }
    }

    /// Fan a message out to every registered stream.
    ///
    /// Stamps a `timestamp` if the message does not carry one and returns
    /// the number of recipients reached. Streams whose transport is gone
    /// are torn down and excluded from the count.
    pub async fn broadcast(&self, mut message: Value) -> usize {
        protocol::stamp_timestamp(&mut message, Utc::now());

        let outcome = self.registry.broadcast(&message).await;

        for id in &outcome.dropped {
            counter!(names::HUB_DISCONNECTIONS_TOTAL, "tier" => "sse").increment(1);
            gauge!(names::HUB_CONNECTIONS_ACTIVE, "tier" => "sse").decrement(1.0);
            audit::record(&self.audit, AuditEvent::new("disconnect", "sse").connection(id));
        }

        counter!(names::HUB_BROADCAST_RECIPIENTS_TOTAL).increment(outcome.reached as u64);
        tracing::debug!(recipients = outcome.reached, "broadcast to SSE streams");
        outcome.reached
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.count().await
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.registry.contains(id).await
    }

    pub async fn drain(&self) {
        let drained = self.registry.drain().await;
        if drained > 0 {
            tracing::info!(drained, "drained SSE registry");
        }
    }
}
