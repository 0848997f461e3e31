//! Metrics Route
//!
//! Prometheus text exposition rendered from the installed recorder.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::api::state::AppState;

/// GET /metrics
pub async fn render_metrics(State(state): State<Arc<AppState>>) -> Response {
    let body = state.metrics.render();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}
