//! Application State
//!
//! Shared state accessible by all handlers: the per-path socket hubs, the
//! overlay hub, the SSE broker, the collaborator sinks, and the metrics
//! handle. Wrapped in Arc for sharing across async tasks.
//!
//! Registries are created here at hub startup and torn down by
//! [`AppState::drain`] at shutdown - there are no ambient globals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;

use crate::audit::{AuditSink, LogAuditSink, LogNotificationDispatcher, NotificationDispatcher};
use crate::config::Config;
use crate::overlay::{spawn_sweeper, OverlayHub};
use crate::sse::SseBroker;
use crate::websocket::{spawn_supervisor, SocketHub};

use super::dto::TierCounts;

/// Shared application state for all handlers
pub struct AppState {
    pub config: Arc<Config>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
    /// Persistent-socket managers, one per configured hub path
    pub socket_hubs: HashMap<String, Arc<SocketHub>>,
    /// Socket-abstraction overlay manager
    pub overlay: Arc<OverlayHub>,
    /// Server-push stream broker
    pub sse: Arc<SseBroker>,
    /// Audit log collaborator
    pub audit: Arc<dyn AuditSink>,
    /// Notification delivery collaborator
    pub notifier: Arc<dyn NotificationDispatcher>,
    /// Prometheus exposition handle
    pub metrics: PrometheusHandle,
}

impl AppState {
    /// Create state with the default logging collaborators
    pub fn new(config: Config, metrics: PrometheusHandle) -> Self {
        Self::with_collaborators(
            config,
            metrics,
            Arc::new(LogAuditSink),
            Arc::new(LogNotificationDispatcher),
        )
    }

    /// Create state wired to real collaborator implementations
    pub fn with_collaborators(
        config: Config,
        metrics: PrometheusHandle,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let mut socket_hubs = HashMap::new();
        for path in &config.websocket.paths {
            socket_hubs.insert(
                path.clone(),
                Arc::new(SocketHub::new(path, &config.websocket, Arc::clone(&audit))),
            );
        }

        let overlay = Arc::new(OverlayHub::new(&config.overlay, Arc::clone(&audit)));
        let sse = Arc::new(SseBroker::new(&config.sse, Arc::clone(&audit)));

        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            socket_hubs,
            overlay,
            sse,
            audit,
            notifier,
            metrics,
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Paths that upgrade to a hub-managed socket (diagnostics)
    pub fn hub_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.socket_hubs.keys().cloned().collect();
        paths.push(self.overlay.path().to_string());
        paths.sort();
        paths
    }

    /// Live connection counts per tier
    pub async fn connection_counts(&self) -> TierCounts {
        let mut websocket = HashMap::new();
        for (path, hub) in &self.socket_hubs {
            websocket.insert(path.clone(), hub.connection_count().await);
        }

        TierCounts {
            websocket,
            overlay: self.overlay.connection_count().await,
            sse: self.sse.connection_count().await,
        }
    }

    /// Start the liveness tasks: one heartbeat supervisor per socket hub
    /// and the overlay idle sweeper.
    ///
    /// The returned handles must be aborted before [`AppState::drain`].
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        for hub in self.socket_hubs.values() {
            tasks.push(spawn_supervisor(Arc::clone(hub)));
        }
        tasks.push(spawn_sweeper(Arc::clone(&self.overlay)));
        tasks
    }

    /// Close every connection in every tier (shutdown path).
    pub async fn drain(&self) {
        for hub in self.socket_hubs.values() {
            hub.drain().await;
        }
        self.overlay.drain().await;
        self.sse.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebSocketConfig;

    fn test_state() -> AppState {
        let config = Config {
            websocket: WebSocketConfig {
                paths: vec!["/ws".to_string(), "/ws/agents".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        AppState::new(config, crate::metrics::build_recorder())
    }

    #[tokio::test]
    async fn test_one_hub_per_configured_path() {
        let state = test_state();
        assert_eq!(state.socket_hubs.len(), 2);
        assert!(state.socket_hubs.contains_key("/ws"));
        assert!(state.socket_hubs.contains_key("/ws/agents"));
    }

    #[tokio::test]
    async fn test_hub_paths_include_overlay() {
        let state = test_state();
        let paths = state.hub_paths();
        assert!(paths.contains(&"/overlay".to_string()));
        assert!(paths.contains(&"/ws".to_string()));
    }

    #[tokio::test]
    async fn test_connection_counts_start_empty() {
        let state = test_state();
        let counts = state.connection_counts().await;
        assert_eq!(counts.total(), 0);
    }

    #[tokio::test]
    async fn test_background_tasks_cover_all_hubs() {
        let state = test_state();
        let tasks = state.spawn_background();
        // Two supervisors plus the overlay sweeper.
        assert_eq!(tasks.len(), 3);
        for task in tasks {
            task.abort();
        }
    }
}
