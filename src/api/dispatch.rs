//! Upgrade Dispatcher
//!
//! Middleware observing every protocol-upgrade attempt at the server
//! boundary before any transport manager claims it. It resolves the
//! requested path and logs it for diagnostics - headers too for recognized
//! hub paths - but never accepts or rejects the upgrade itself; that
//! decision belongs to the manager bound to the path. A parsing failure on
//! the request target is caught and logged without aborting the pipeline.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::state::AppState;

/// Observe upgrade attempts; always forwards the request unchanged.
pub async fn observe_upgrades(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if is_upgrade_attempt(&request) {
        let path = request.uri().path().to_string();

        if let Some(query) = request.uri().query() {
            match urlencoding::decode(query) {
                Ok(decoded) => {
                    tracing::trace!(path = %path, query = %decoded, "upgrade request query")
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "malformed upgrade request query")
                }
            }
        }

        if state.hub_paths().iter().any(|p| p == &path) {
            tracing::debug!(
                path = %path,
                headers = ?request.headers(),
                "protocol upgrade attempt on hub path"
            );
        } else {
            tracing::debug!(path = %path, "protocol upgrade attempt");
        }
    }

    next.run(request).await
}

/// An upgrade attempt carries an `Upgrade` header or a `Connection: upgrade`.
fn is_upgrade_attempt(request: &Request) -> bool {
    if request.headers().contains_key(header::UPGRADE) {
        return true;
    }
    request
        .headers()
        .get(header::CONNECTION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false)
}
