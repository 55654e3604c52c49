//! WebSocket Relay Endpoint
//!
//! One browser connection maps to one relay session:
//!
//! - `session`: upgrades the connection, adapts the socket halves to the relay's
//!   audio stream / event sink, and runs the relay to completion.
//!
//! Framing contract: the client sends raw PCM16 (mono, 16 kHz) in binary frames
//! and receives one JSON text frame per upstream event.

pub mod session;

pub use session::ws_handler;
