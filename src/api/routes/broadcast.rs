//! Broadcast Route
//!
//! Entry point for external callers (notification services, schedulers) to
//! fan a message out to every registered server-push stream. The message is
//! arbitrary JSON; a `timestamp` is stamped if absent. The response reports
//! how many recipients were reached.

use axum::{extract::State, Json};
use serde_json::Value;
use std::sync::Arc;

use crate::api::dto::BroadcastResponse;
use crate::api::state::AppState;

/// POST /api/v1/broadcast
pub async fn broadcast(
    State(state): State<Arc<AppState>>,
    Json(message): Json<Value>,
) -> Json<BroadcastResponse> {
    let recipients = state.sse.broadcast(message.clone()).await;

    // Hand the message to the notification collaborator as well;
    // fire-and-forget, a failure never reaches the caller.
    let notifier = Arc::clone(&state.notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.dispatch("broadcast", message).await {
            tracing::warn!(error = %e, "notification dispatch failed");
        }
    });

    Json(BroadcastResponse { recipients })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(
            Config::default(),
            crate::metrics::build_recorder(),
        ))
    }

    #[tokio::test]
    async fn test_broadcast_with_no_streams_reaches_nobody() {
        let state = test_state();
        let Json(response) = broadcast(State(state), Json(json!({"kind": "notice"}))).await;
        assert_eq!(response.recipients, 0);
    }

    #[tokio::test]
    async fn test_broadcast_counts_registered_streams() {
        let state = test_state();
        let (_, mut rx1) = state.sse.connect(Some("a".into())).await.unwrap();
        let (_, mut rx2) = state.sse.connect(Some("b".into())).await.unwrap();
        rx1.recv().await.unwrap();
        rx2.recv().await.unwrap();

        let Json(response) =
            broadcast(State(Arc::clone(&state)), Json(json!({"kind": "notice"}))).await;
        assert_eq!(response.recipients, 2);

        // Both streams got the message with a stamped timestamp.
        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await {
                Some(crate::registry::Frame::Envelope(message)) => {
                    assert_eq!(message["kind"], "notice");
                    assert!(message["timestamp"].is_string());
                }
                other => panic!("expected envelope, got {other:?}"),
            }
        }
    }
}
