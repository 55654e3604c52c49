//! Live Relay API Library Crate
//!
//! This library contains the web-facing half of the relay: configuration,
//! the shared application state, the WebSocket relay endpoint, and routing.
//! The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod router;
pub mod state;
pub mod ws;
