//! Persistent-Socket Tier
//!
//! The primary transport: full-duplex WebSocket connections with
//! supervisor-driven liveness.
//!
//! ## Architecture
//!
//! - **SocketHub**: per-endpoint manager owning the tier registry
//! - **Handler**: upgrade handling, message dispatch, connection lifecycle
//! - **Supervisor**: recurring mark-then-check probe cycle
//!
//! Clients connect to a configured hub path (default `/ws`), receive a
//! `system` envelope announcing the endpoint, and exchange JSON envelopes.
//! A connection that stops acknowledging probes is terminated on the second
//! supervisor cycle after going silent.

mod handler;
mod hub;
mod supervisor;

pub use handler::websocket_handler;
pub use hub::SocketHub;
pub use supervisor::spawn_supervisor;
