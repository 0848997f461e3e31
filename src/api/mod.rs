//! Courier HTTP surface
//!
//! Router and server for the hub, built with Axum.
//!
//! # Endpoints
//!
//! ## Transports
//! - `GET /ws` (and any extra configured paths) - persistent-socket upgrade
//! - `GET /overlay` - socket-abstraction overlay upgrade
//! - `GET /api/v1/stream` - server-push stream (`text/event-stream`)
//! - `POST /api/v1/fallback` - stateless echo
//!
//! ## Operations
//! - `POST /api/v1/broadcast` - fan a message out to every stream
//! - `GET /api/v1/stats` - per-tier connection counts
//! - `GET /metrics` - Prometheus exposition
//!
//! ## Health
//! - `GET /health/live` - liveness probe
//! - `GET /health/ready` - readiness probe
//! - `GET /health` - full health status
//!
//! Every request passes the upgrade dispatcher middleware first, so upgrade
//! attempts are logged before a transport manager claims them.

pub mod dispatch;
pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    extract::{Query, WebSocketUpgrade},
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::overlay::{overlay_handler, OverlayParams};
use crate::sse::{stream_handler, StreamParams};
use crate::websocket::websocket_handler;

/// Build the router with all transports, routes, and middleware
pub fn build_router(state: AppState) -> Router {
    router_from_shared(Arc::new(state))
}

/// Build the router over an already-shared state handle
fn router_from_shared(shared_state: Arc<AppState>) -> Router {

    // One persistent-socket route per configured hub path, each bound to
    // its own manager and registry.
    let mut transports = Router::new();
    for (path, hub) in &shared_state.socket_hubs {
        let hub = Arc::clone(hub);
        transports = transports.route(
            path,
            get(move |ws: WebSocketUpgrade| {
                let hub = Arc::clone(&hub);
                async move { websocket_handler(ws, hub).await }
            }),
        );
    }

    let overlay_hub = Arc::clone(&shared_state.overlay);
    let overlay_path = shared_state.overlay.path().to_string();
    transports = transports.route(
        &overlay_path,
        get(
            move |ws: WebSocketUpgrade, Query(params): Query<OverlayParams>| {
                let hub = Arc::clone(&overlay_hub);
                async move { overlay_handler(ws, params, hub).await }
            },
        ),
    );

    let sse_broker = Arc::clone(&shared_state.sse);
    let api_routes = Router::new()
        .route(
            "/stream",
            get(move |Query(params): Query<StreamParams>| {
                let broker = Arc::clone(&sse_broker);
                async move { stream_handler(params, broker).await }
            }),
        )
        .route("/fallback", post(routes::fallback::fallback_echo))
        .route("/broadcast", post(routes::broadcast::broadcast))
        .route("/stats", get(routes::stats::stats));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .route("/metrics", get(routes::metrics::render_metrics))
        .merge(transports)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&shared_state),
            dispatch::observe_upgrades,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&shared_state.config.server.allowed_origins))
        .with_state(shared_state)
}

/// Origin policy: an empty allowlist accepts all origins.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring unparsable allowed origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Start the hub server
///
/// Spawns the liveness tasks, serves until a shutdown signal, then cancels
/// the tasks *before* draining the registries so no probe touches a closed
/// handle.
pub async fn serve(state: AppState) -> Result<(), ApiError> {
    let addr = state.config.server.addr();

    let background = state.spawn_background();
    let shared = Arc::new(state);
    let router = router_from_shared(Arc::clone(&shared));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Courier hub listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    for task in background {
        task.abort();
    }
    shared.drain().await;

    tracing::info!("Courier hub shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
