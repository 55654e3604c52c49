//! Gemini Live API client.
//!
//! Implements the `LiveConnector` / `LiveSession` traits from `liverelay-core`
//! over the Live API's bidirectional WebSocket, for both the Google AI Studio
//! (API key) and Vertex AI (project + bearer token) endpoints.

mod endpoint;
mod protocol;
mod session;

pub use endpoint::Endpoint;
pub use session::{DEFAULT_SETUP_TIMEOUT, GeminiConnector, GeminiSession};
