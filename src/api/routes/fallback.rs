//! Stateless Fallback Route
//!
//! The lowest transport tier: a plain request/response echo for clients
//! with no long-lived channel at all. No connection state is created; the
//! caller is acknowledged immediately and a fallback-usage counter records
//! why this tier was used.

use axum::{extract::State, Json};
use chrono::Utc;
use metrics::counter;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::dto::FallbackRequest;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::audit::{self, AuditEvent};
use crate::metrics as names;
use crate::protocol;

/// POST /api/v1/fallback
///
/// Requires `message` in the body; replies with an echo envelope tagged
/// `via: "fallback"`.
pub async fn fallback_echo(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FallbackRequest>,
) -> ApiResult<Json<Value>> {
    let message = request
        .message
        .ok_or_else(|| ApiError::Validation("message is required".to_string()))?;

    counter!(names::FALLBACK_TOTAL, "reason" => names::REASON_MESSAGE_SENT_VIA_HTTP).increment(1);
    audit::record(
        &state.audit,
        AuditEvent::new("fallback_echo", "fallback").detail(json!({
            "clientId": request.client_id,
        })),
    );

    Ok(Json(json!({
        "type": "echo",
        "originalMessage": message,
        "timestamp": protocol::iso_timestamp(Utc::now()),
        "via": "fallback",
        "clientId": request.client_id,
    })))
}
