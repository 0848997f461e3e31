//! Heartbeat Supervisor
//!
//! One recurring task per hub endpoint scanning the PersistentSocket
//! registry on a fixed interval. Mark-then-check: a connection survives
//! only if its transport acknowledges at least one probe per interval, so
//! a silent peer is terminated on the second cycle after going quiet -
//! never fewer than one full grace interval.
//!
//! The supervisor never blocks on a slow client; probes and terminations
//! are fire-and-forget per connection. On shutdown this task is aborted
//! before the registries are drained.

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::hub::SocketHub;

/// Spawn the recurring probe task for one hub endpoint.
///
/// The returned handle is owned by the server runtime and aborted first
/// during shutdown.
pub fn spawn_supervisor(hub: Arc<SocketHub>) -> JoinHandle<()> {
    let interval = hub.heartbeat_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; connections registered after
        // startup must get a full grace interval before their first probe.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let terminated = hub.probe_cycle().await;
            if !terminated.is_empty() {
                tracing::debug!(
                    endpoint = %hub.endpoint(),
                    count = terminated.len(),
                    "heartbeat cycle terminated connections"
                );
            }
        }
    })
}
