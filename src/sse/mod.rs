//! Server-Push Stream Tier
//!
//! One-way `text/event-stream` channels for clients behind proxies that
//! block full-duplex sockets. Streams are registered by client id so the
//! broadcast entry point can reach them, and each stream carries its own
//! heartbeat to keep intermediaries from timing it out.

mod broker;
mod handler;

pub use broker::SseBroker;
pub use handler::{stream_handler, EventStream, StreamParams};
