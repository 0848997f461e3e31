//! Connection Registry
//!
//! Tier-scoped bookkeeping for live connections. Each transport tier owns
//! exactly one [`Registry`]; a connection id appears in at most one tier's
//! registry at a time. Entries own their outbound send handle and every
//! timer scheduled on their behalf - no timer outlives its connection.
//!
//! The registry is mutated only by its owning manager, plus the heartbeat
//! supervisor's liveness transitions on the persistent-socket tier.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The four transport tiers a client can reach the hub through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    PersistentSocket,
    SocketOverlay,
    ServerPushStream,
    StatelessFallback,
}

impl Transport {
    /// Label used in metrics and tracing fields.
    pub fn label(&self) -> &'static str {
        match self {
            Transport::PersistentSocket => "websocket",
            Transport::SocketOverlay => "overlay",
            Transport::ServerPushStream => "sse",
            Transport::StatelessFallback => "fallback",
        }
    }
}

/// Per-connection liveness state machine.
///
/// `Alive -> (probe sent) -> AwaitingAck -> (ack) -> Alive`, or
/// `AwaitingAck -> (next cycle, no ack) -> Terminated`. Meaningful only for
/// the persistent-socket tier; the other tiers stay `Alive` until closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    AwaitingAck,
    Terminated,
}

/// Outbound unit pushed through a connection's send handle.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A JSON envelope to deliver to the client.
    Envelope(Value),
    /// Low-level liveness probe (WebSocket ping frame).
    Probe,
    /// Close the transport.
    Close,
}

/// One live channel to one client.
pub struct ConnectionEntry {
    pub id: String,
    pub transport: Transport,
    /// Exclusively owned by this entry; never shared across tiers.
    sender: mpsc::UnboundedSender<Frame>,
    pub liveness: Liveness,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    timers: Vec<JoinHandle<()>>,
}

impl ConnectionEntry {
    fn new(id: String, transport: Transport, sender: mpsc::UnboundedSender<Frame>) -> Self {
        let now = Utc::now();
        Self {
            id,
            transport,
            sender,
            liveness: Liveness::Alive,
            created_at: now,
            last_seen_at: now,
            timers: Vec::new(),
        }
    }

    /// Push a frame to this client. Fails when the transport side is gone.
    fn send(&self, frame: Frame) -> Result<(), HubError> {
        self.sender.send(frame).map_err(|_| HubError::SendFailed)
    }
}

impl Drop for ConnectionEntry {
    fn drop(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

/// In-memory mapping from connection id to connection state, scoped to one
/// transport tier.
pub struct Registry {
    transport: Transport,
    entries: RwLock<HashMap<String, ConnectionEntry>>,
    max_connections: usize,
}

impl Registry {
    pub fn new(transport: Transport, max_connections: usize) -> Self {
        Self {
            transport,
            entries: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Register a new connection.
    ///
    /// A `None` id gets a generated UUID. Re-registering an existing id
    /// replaces the old entry (its timers are cancelled on drop). Fails when
    /// the connection limit is reached.
    pub async fn register(
        &self,
        id: Option<String>,
        sender: mpsc::UnboundedSender<Frame>,
    ) -> Result<String, HubError> {
        let mut entries = self.entries.write().await;
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());

        if !entries.contains_key(&id) && entries.len() >= self.max_connections {
            return Err(HubError::TooManyConnections {
                limit: self.max_connections,
            });
        }

        if let Some(old) = entries.insert(id.clone(), ConnectionEntry::new(id.clone(), self.transport, sender))
        {
            let _ = old.send(Frame::Close);
            tracing::debug!(
                connection_id = %id,
                tier = self.transport.label(),
                "replaced existing registry entry"
            );
        }

        Ok(id)
    }

    /// Remove a connection and cancel every timer it owns.
    pub async fn unregister(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    /// Attach a timer to a connection so it is cancelled with it.
    ///
    /// If the connection is already gone the timer is aborted immediately.
    pub async fn attach_timer(&self, id: &str, timer: JoinHandle<()>) {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(entry) => entry.timers.push(timer),
            None => timer.abort(),
        }
    }

    /// Push a frame to one connection.
    pub async fn send_to(&self, id: &str, frame: Frame) -> Result<(), HubError> {
        let entries = self.entries.read().await;
        let entry = entries.get(id).ok_or(HubError::ConnectionNotFound)?;
        entry.send(frame)
    }

    /// Refresh a connection's `last_seen_at`.
    pub async fn touch(&self, id: &str) {
        if let Some(entry) = self.entries.write().await.get_mut(id) {
            entry.last_seen_at = Utc::now();
        }
    }

    /// Record a liveness acknowledgement: `AwaitingAck -> Alive`.
    pub async fn ack(&self, id: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(entry) => {
                entry.liveness = Liveness::Alive;
                entry.last_seen_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// One supervisor cycle over this registry (mark-then-check).
    ///
    /// Connections still awaiting an acknowledgement from the previous cycle
    /// are terminated and removed; every other connection is marked
    /// `AwaitingAck` and sent a low-level probe. A probe that cannot be sent
    /// terminates that connection immediately, without affecting the rest.
    /// Returns the ids that were terminated.
    pub async fn probe_cycle(&self) -> Vec<String> {
        let mut entries = self.entries.write().await;
        let mut terminated = Vec::new();

        let ids: Vec<String> = entries.keys().cloned().collect();
        for id in ids {
            let entry = match entries.get_mut(&id) {
                Some(entry) => entry,
                None => continue,
            };

            if entry.liveness == Liveness::AwaitingAck {
                entry.liveness = Liveness::Terminated;
                let _ = entry.send(Frame::Close);
                entries.remove(&id);
                terminated.push(id);
                continue;
            }

            entry.liveness = Liveness::AwaitingAck;
            if entry.send(Frame::Probe).is_err() {
                entry.liveness = Liveness::Terminated;
                entries.remove(&id);
                terminated.push(id);
            }
        }

        terminated
    }

    /// Remove connections idle longer than `max_idle` (overlay liveness).
    ///
    /// Returns the ids that were disconnected.
    pub async fn sweep_idle(&self, max_idle: Duration) -> Vec<String> {
        let cutoff = Utc::now() - max_idle;
        let mut entries = self.entries.write().await;

        let expired: Vec<String> = entries
            .values()
            .filter(|entry| entry.last_seen_at < cutoff)
            .map(|entry| entry.id.clone())
            .collect();

        for id in &expired {
            if let Some(entry) = entries.remove(id) {
                let _ = entry.send(Frame::Close);
            }
        }

        expired
    }

    /// Fan an envelope out to every connection in this registry.
    ///
    /// A send that fails tears that connection down as if it had closed;
    /// returns the recipients reached and the ids dropped on the way.
    pub async fn broadcast(&self, envelope: &Value) -> BroadcastOutcome {
        let mut entries = self.entries.write().await;
        let mut reached = 0;
        let mut dropped = Vec::new();

        for entry in entries.values() {
            match entry.send(Frame::Envelope(envelope.clone())) {
                Ok(()) => reached += 1,
                Err(_) => dropped.push(entry.id.clone()),
            }
        }

        for id in &dropped {
            entries.remove(id);
            tracing::debug!(
                connection_id = %id,
                tier = self.transport.label(),
                "dropped unreachable connection during broadcast"
            );
        }

        BroadcastOutcome { reached, dropped }
    }

    /// Fan an envelope out to a subset of connections (room delivery).
    pub async fn send_to_many(&self, ids: &[String], envelope: &Value) -> usize {
        let entries = self.entries.read().await;
        ids.iter()
            .filter_map(|id| entries.get(id))
            .filter(|entry| entry.send(Frame::Envelope(envelope.clone())).is_ok())
            .count()
    }

    /// Close every connection and empty the registry (shutdown path).
    pub async fn drain(&self) -> usize {
        let mut entries = self.entries.write().await;
        let drained = entries.len();
        for entry in entries.values() {
            let _ = entry.send(Frame::Close);
        }
        entries.clear();
        drained
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

/// Result of a registry-wide fan-out.
#[derive(Debug, Default)]
pub struct BroadcastOutcome {
    /// Recipients the envelope was pushed to.
    pub reached: usize,
    /// Connections torn down because their transport was gone.
    pub dropped: Vec<String>,
}

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Too many connections (limit: {limit})")]
    TooManyConnections { limit: usize },

    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Failed to send to connection")]
    SendFailed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn test_registry() -> Registry {
        Registry::new(Transport::PersistentSocket, 16)
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let registry = test_registry();
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = registry.register(None, tx).await.unwrap();
        assert!(!id.is_empty());
        assert_eq!(registry.count().await, 1);

        assert!(registry.unregister(&id).await);
        assert_eq!(registry.count().await, 0);
        assert!(!registry.unregister(&id).await);
    }

    #[tokio::test]
    async fn test_client_supplied_id_kept() {
        let registry = test_registry();
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = registry.register(Some("client-7".into()), tx).await.unwrap();
        assert_eq!(id, "client-7");
        assert!(registry.contains("client-7").await);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let registry = Registry::new(Transport::PersistentSocket, 2);
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let (tx3, _rx3) = mpsc::unbounded_channel();

        registry.register(None, tx1).await.unwrap();
        registry.register(None, tx2).await.unwrap();
        let result = registry.register(None, tx3).await;

        assert!(matches!(
            result,
            Err(HubError::TooManyConnections { limit: 2 })
        ));
    }

    #[tokio::test]
    async fn test_reregister_replaces_and_closes_old() {
        let registry = test_registry();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        registry.register(Some("dup".into()), tx1).await.unwrap();
        registry.register(Some("dup".into()), tx2).await.unwrap();

        assert_eq!(registry.count().await, 1);
        assert_eq!(rx1.recv().await, Some(Frame::Close));
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection() {
        let registry = test_registry();
        let result = registry.send_to("ghost", Frame::Probe).await;
        assert!(matches!(result, Err(HubError::ConnectionNotFound)));
    }

    #[tokio::test]
    async fn test_probe_cycle_marks_then_terminates() {
        let registry = test_registry();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry.register(None, tx).await.unwrap();

        // First cycle: marked AwaitingAck and probed, not terminated.
        let terminated = registry.probe_cycle().await;
        assert!(terminated.is_empty());
        assert_eq!(rx.recv().await, Some(Frame::Probe));

        // No ack arrives; second cycle terminates and removes the entry.
        let terminated = registry.probe_cycle().await;
        assert_eq!(terminated, vec![id.clone()]);
        assert!(!registry.contains(&id).await);
        assert_eq!(rx.recv().await, Some(Frame::Close));
    }

    #[tokio::test]
    async fn test_acking_connection_survives_cycles() {
        let registry = test_registry();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry.register(None, tx).await.unwrap();

        for _ in 0..10 {
            let terminated = registry.probe_cycle().await;
            assert!(terminated.is_empty());
            assert_eq!(rx.recv().await, Some(Frame::Probe));
            assert!(registry.ack(&id).await);
        }
        assert!(registry.contains(&id).await);
    }

    #[tokio::test]
    async fn test_probe_send_failure_terminates_immediately() {
        let registry = test_registry();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.register(None, tx).await.unwrap();
        drop(rx);

        let terminated = registry.probe_cycle().await;
        assert_eq!(terminated, vec![id]);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_aborts_timers() {
        let registry = test_registry();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.register(None, tx).await.unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });
        registry.attach_timer(&id, timer).await;

        registry.unregister(&id).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_attach_timer_to_missing_connection_aborts() {
        let registry = test_registry();

        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });

        registry.attach_timer("ghost", timer).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_live_connections() {
        let registry = Registry::new(Transport::ServerPushStream, 16);
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, rx3) = mpsc::unbounded_channel();

        registry.register(None, tx1).await.unwrap();
        registry.register(None, tx2).await.unwrap();
        registry.register(None, tx3).await.unwrap();
        drop(rx3); // one client already went away

        let outcome = registry.broadcast(&json!({"type": "system"})).await;
        assert_eq!(outcome.reached, 2);
        assert_eq!(outcome.dropped.len(), 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());

        // The dead connection was torn down during the fan-out.
        assert_eq!(registry.count().await, 2);
    }

    #[tokio::test]
    async fn test_sweep_idle_disconnects_silent_entries() {
        let registry = Registry::new(Transport::SocketOverlay, 16);
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let stale = registry.register(Some("stale".into()), tx1).await.unwrap();
        registry.register(Some("fresh".into()), tx2).await.unwrap();

        // Age the first entry past the cutoff.
        {
            let mut entries = registry.entries.write().await;
            entries.get_mut(&stale).unwrap().last_seen_at =
                Utc::now() - Duration::seconds(120);
        }

        let swept = registry.sweep_idle(Duration::seconds(60)).await;
        assert_eq!(swept, vec!["stale".to_string()]);
        assert_eq!(rx1.recv().await, Some(Frame::Close));
        assert!(registry.contains("fresh").await);
    }

    #[tokio::test]
    async fn test_drain_closes_everything() {
        let registry = test_registry();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register(None, tx1).await.unwrap();
        registry.register(None, tx2).await.unwrap();

        assert_eq!(registry.drain().await, 2);
        assert_eq!(registry.count().await, 0);
        assert_eq!(rx1.recv().await, Some(Frame::Close));
        assert_eq!(rx2.recv().await, Some(Frame::Close));
    }

    #[tokio::test]
    async fn test_send_to_many_counts_subset() {
        let registry = Registry::new(Transport::SocketOverlay, 16);
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register(Some("a".into()), tx1).await.unwrap();
        registry.register(Some("b".into()), tx2).await.unwrap();

        let sent = registry
            .send_to_many(&["a".to_string(), "ghost".to_string()], &json!({"type": "message"}))
            .await;
        assert_eq!(sent, 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }
}
