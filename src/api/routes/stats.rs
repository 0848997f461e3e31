//! Stats Route
//!
//! Operator-facing snapshot of live connection counts per tier.

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::StatsResponse;
use crate::api::state::AppState;

/// GET /api/v1/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_seconds: state.uptime_seconds(),
        connections: state.connection_counts().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_stats_reflect_registered_streams() {
        let state = Arc::new(AppState::new(
            Config::default(),
            crate::metrics::build_recorder(),
        ));
        let (_, _rx) = state.sse.connect(None).await.unwrap();

        let Json(response) = stats(State(Arc::clone(&state))).await;
        assert_eq!(response.connections.sse, 1);
        assert_eq!(response.connections.total(), 1);
    }
}
