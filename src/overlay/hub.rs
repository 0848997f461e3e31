//! Overlay Connection Hub
//!
//! Registry and room bookkeeping for the socket-abstraction overlay tier.
//! The overlay keeps its own registry so connection identities are never
//! shared with the persistent-socket tier, and its own liveness mechanism:
//! a timestamp-based idle sweep instead of the heartbeat supervisor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::{counter, gauge};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::audit::{self, AuditEvent, AuditSink};
use crate::config::OverlayConfig;
use crate::metrics as names;
use crate::registry::{Frame, HubError, Registry, Transport};

/// Manager for the overlay endpoint.
pub struct OverlayHub {
    path: String,
    registry: Registry,
    /// Room name -> member connection ids.
    rooms: RwLock<HashMap<String, HashSet<String>>>,
    audit: Arc<dyn AuditSink>,
    idle_timeout: chrono::Duration,
    sweep_interval: std::time::Duration,
}

impl OverlayHub {
    pub fn new(config: &OverlayConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            path: config.path.clone(),
            registry: Registry::new(Transport::SocketOverlay, config.max_connections),
            rooms: RwLock::new(HashMap::new()),
            audit,
            idle_timeout: chrono::Duration::seconds(config.idle_timeout_secs as i64),
            sweep_interval: std::time::Duration::from_secs(config.sweep_interval_secs),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Register an overlay connection, keeping a client-supplied id if given.
    pub async fn register(
        &self,
        client_id: Option<String>,
        sender: mpsc::UnboundedSender<Frame>,
    ) -> Result<String, HubError> {
        let id = self.registry.register(client_id, sender).await?;

        counter!(names::HUB_CONNECTIONS_TOTAL, "tier" => "overlay").increment(1);
        gauge!(names::HUB_CONNECTIONS_ACTIVE, "tier" => "overlay").increment(1.0);
        audit::record(
            &self.audit,
            AuditEvent::new("connect", "overlay").connection(&id),
        );

        tracing::info!(connection_id = %id, "Overlay connected");
        Ok(id)
    }

    /// Unregister a connection and drop its room memberships.
    pub async fn unregister(&self, id: &str) {
        if self.registry.unregister(id).await {
            let mut rooms = self.rooms.write().await;
            rooms.retain(|_, members| {
                members.remove(id);
                !members.is_empty()
            });

            counter!(names::HUB_DISCONNECTIONS_TOTAL, "tier" => "overlay").increment(1);
            gauge!(names::HUB_CONNECTIONS_ACTIVE, "tier" => "overlay").decrement(1.0);
            audit::record(
                &self.audit,
                AuditEvent::new("disconnect", "overlay").connection(id),
            );
            tracing::info!(connection_id = %id, "Overlay disconnected");
        }
    }

    /// Add a connection to a room.
    pub async fn join(&self, id: &str, room: &str) {
        self.rooms
            .write()
            .await
            .entry(room.to_string())
            .or_insert_with(HashSet::new)
            .insert(id.to_string());
        tracing::debug!(connection_id = %id, room, "joined room");
    }

    /// Remove a connection from a room.
    pub async fn leave(&self, id: &str, room: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
        tracing::debug!(connection_id = %id, room, "left room");
    }

    /// Fan an envelope out to every room member except the sender.
    ///
    /// Returns the number of members reached.
    pub async fn send_to_room(&self, room: &str, sender_id: &str, envelope: &Value) -> usize {
        let members: Vec<String> = {
            let rooms = self.rooms.read().await;
            match rooms.get(room) {
                Some(members) => members
                    .iter()
                    .filter(|id| id.as_str() != sender_id)
                    .cloned()
                    .collect(),
                None => return 0,
            }
        };

        self.registry.send_to_many(&members, envelope).await
    }

    pub async fn room_size(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    pub async fn send_envelope(&self, id: &str, envelope: Value) -> Result<(), HubError> {
        self.registry.send_to(id, Frame::Envelope(envelope)).await
    }

    /// Refresh `last_seen_at`; every inbound frame counts as liveness here.
    pub async fn touch(&self, id: &str) {
        self.registry.touch(id).await;
    }

    /// One idle sweep: disconnect connections silent past the timeout.
    pub async fn sweep_once(&self) -> Vec<String> {
        let swept = self.registry.sweep_idle(self.idle_timeout).await;

        if !swept.is_empty() {
            let mut rooms = self.rooms.write().await;
            rooms.retain(|_, members| {
                for id in &swept {
                    members.remove(id);
                }
                !members.is_empty()
            });
        }

        for id in &swept {
            counter!(names::HUB_LIVENESS_TERMINATIONS_TOTAL, "tier" => "overlay").increment(1);
            counter!(names::HUB_DISCONNECTIONS_TOTAL, "tier" => "overlay").increment(1);
            gauge!(names::HUB_CONNECTIONS_ACTIVE, "tier" => "overlay").decrement(1.0);
            audit::record(
                &self.audit,
                AuditEvent::new("liveness_timeout", "overlay").connection(id),
            );
            tracing::warn!(connection_id = %id, "disconnected idle overlay connection");
        }

        swept
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.count().await
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.registry.contains(id).await
    }

    pub async fn drain(&self) {
        let drained = self.registry.drain().await;
        self.rooms.write().await.clear();
        if drained > 0 {
            tracing::info!(drained, "drained overlay registry");
        }
    }
}

/// Spawn the recurring idle sweep for the overlay tier.
pub fn spawn_sweeper(hub: Arc<OverlayHub>) -> JoinHandle<()> {
    let interval = hub.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            hub.sweep_once().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::LogAuditSink;
    use serde_json::json;

    fn test_hub() -> OverlayHub {
        OverlayHub::new(&OverlayConfig::default(), Arc::new(LogAuditSink))
    }

    #[tokio::test]
    async fn test_client_supplied_id() {
        let hub = test_hub();
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = hub.register(Some("agent-1".into()), tx).await.unwrap();
        assert_eq!(id, "agent-1");
        assert!(hub.contains("agent-1").await);
    }

    #[tokio::test]
    async fn test_room_fanout_excludes_sender() {
        let hub = test_hub();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();

        hub.register(Some("a".into()), tx_a).await.unwrap();
        hub.register(Some("b".into()), tx_b).await.unwrap();
        hub.register(Some("c".into()), tx_c).await.unwrap();

        hub.join("a", "ops").await;
        hub.join("b", "ops").await;

        let reached = hub
            .send_to_room("ops", "a", &json!({"type": "message", "content": "hi"}))
            .await;

        assert_eq!(reached, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fanout_to_unknown_room_reaches_nobody() {
        let hub = test_hub();
        assert_eq!(hub.send_to_room("ghost", "a", &json!({})).await, 0);
    }

    #[tokio::test]
    async fn test_leave_and_unregister_clean_up_rooms() {
        let hub = test_hub();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();

        hub.register(Some("a".into()), tx_a).await.unwrap();
        hub.register(Some("b".into()), tx_b).await.unwrap();
        hub.join("a", "ops").await;
        hub.join("b", "ops").await;
        assert_eq!(hub.room_size("ops").await, 2);

        hub.leave("a", "ops").await;
        assert_eq!(hub.room_size("ops").await, 1);

        hub.unregister("b").await;
        assert_eq!(hub.room_size("ops").await, 0);
    }

    #[tokio::test]
    async fn test_sweep_disconnects_only_idle_connections() {
        let config = OverlayConfig {
            idle_timeout_secs: 0,
            ..Default::default()
        };
        let hub = OverlayHub::new(&config, Arc::new(LogAuditSink));

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(Some("quiet".into()), tx).await.unwrap();
        hub.join("quiet", "ops").await;

        // With a zero timeout any connection is already past the cutoff.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let swept = hub.sweep_once().await;

        assert_eq!(swept, vec!["quiet".to_string()]);
        assert_eq!(rx.recv().await, Some(Frame::Close));
        assert_eq!(hub.room_size("ops").await, 0);
        assert_eq!(hub.connection_count().await, 0);
    }
}
