//! Socket-Abstraction Overlay Tier
//!
//! A compatibility transport for clients that speak an evented
//! socket-abstraction protocol rather than raw WebSocket envelopes. Offers
//! the same message contract (ping/pong, message/echo, generic echo) plus
//! its own connection ids, per-message acknowledgements, and rooms.
//!
//! The overlay maintains its own registry and its own liveness mechanism
//! (an idle sweep), independent of the persistent-socket tier's heartbeat
//! supervisor.

mod handler;
mod hub;

pub use handler::{overlay_handler, OverlayParams};
pub use hub::{spawn_sweeper, OverlayHub};
