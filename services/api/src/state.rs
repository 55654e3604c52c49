//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the resources every
//! connection needs: the upstream connector, the tool registry and the fixed
//! session configuration.

use crate::config::Config;
use liverelay_core::{
    live::{LiveConnector, SessionConfig},
    tools::ToolRegistry,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connector: Arc<dyn LiveConnector>,
    pub tools: Arc<ToolRegistry>,
    pub session_config: Arc<SessionConfig>,
}

impl AppState {
    /// Builds the state, deriving the upstream session configuration from
    /// `config` and the declarations of `tools`.
    pub fn new(
        config: Config,
        connector: Arc<dyn LiveConnector>,
        tools: ToolRegistry,
        system_instruction: Option<String>,
    ) -> Self {
        let session_config = SessionConfig {
            model: config.model.clone(),
            voice_name: config.voice_name.clone(),
            system_instruction,
            tools: tools.declarations(),
        };
        Self {
            config: Arc::new(config),
            connector,
            tools: Arc::new(tools),
            session_config: Arc::new(session_config),
        }
    }
}
