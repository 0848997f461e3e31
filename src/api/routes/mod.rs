//! API route handlers

pub mod broadcast;
pub mod fallback;
pub mod health;
pub mod metrics;
pub mod stats;
