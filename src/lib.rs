//! # Courier
//!
//! Realtime connection hub: keeps many concurrent client channels alive,
//! detects dead peers, and transparently degrades across four transport
//! tiers so notifications and agent messages still reach clients behind
//! proxies and firewalls that block persistent sockets.
//!
//! ## Transport tiers
//!
//! - **Persistent socket**: full-duplex WebSocket with supervisor-driven
//!   liveness (mark-then-check probes)
//! - **Socket overlay**: a compatibility transport with its own ids,
//!   acknowledgements, rooms, and idle-sweep liveness
//! - **Server-push stream**: long-lived `text/event-stream` responses with
//!   per-stream heartbeats and a broadcast entry point
//! - **Stateless fallback**: plain request/response echo for clients with
//!   no long-lived channel at all
//!
//! ## Modules
//!
//! - [`registry`]: tier-scoped connection bookkeeping and timer ownership
//! - [`protocol`]: the JSON envelope contract and message dispatch
//! - [`websocket`]: persistent-socket manager and heartbeat supervisor
//! - [`overlay`]: socket-abstraction overlay manager
//! - [`sse`]: server-push stream broker
//! - [`api`]: HTTP surface (router, upgrade dispatcher, routes)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use courier::api::{serve, AppState};
//! use courier::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let metrics = courier::metrics::install_recorder();
//!
//!     let state = AppState::new(config, metrics);
//!     serve(state).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod audit;
pub mod config;
pub mod metrics;
pub mod overlay;
pub mod protocol;
pub mod registry;
pub mod sse;
pub mod websocket;

// Re-export top-level types for convenience
pub use api::{build_router, serve, ApiError, AppState};

pub use audit::{
    AuditEvent, AuditSink, CollaboratorError, LogAuditSink, LogNotificationDispatcher,
    NotificationDispatcher,
};

pub use config::{Config, ConfigError};

pub use protocol::MessageKind;

pub use registry::{BroadcastOutcome, Frame, HubError, Liveness, Registry, Transport};

pub use overlay::OverlayHub;

pub use sse::SseBroker;

pub use websocket::SocketHub;
