//! Main Entrypoint for the Live Relay Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the system instruction and registering the tools.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use gemini_realtime::GeminiConnector;
use liverelay_api::{
    config::{Config, DEFAULT_SYSTEM_INSTRUCTION},
    router::create_router,
    state::AppState,
};
use liverelay_core::tools::{KnowledgeBaseTool, ToolRegistry, WeatherTool};
use std::{fs, net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Reads the system instruction file, falling back to the built-in instruction
/// when no path is configured or the file cannot be read.
fn load_system_instruction(config: &Config) -> String {
    let Some(path) = &config.system_instruction_path else {
        return DEFAULT_SYSTEM_INSTRUCTION.to_string();
    };
    match fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => {
            info!(path = %path.display(), "Loaded system instruction.");
            content
        }
        Ok(_) => {
            warn!(path = %path.display(), "System instruction file is empty; using default.");
            DEFAULT_SYSTEM_INSTRUCTION.to_string()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read system instruction; using default.");
            DEFAULT_SYSTEM_INSTRUCTION.to_string()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let system_instruction = load_system_instruction(&config);

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(WeatherTool));
    match config.knowledge_base() {
        Some(settings) => {
            info!(corpus = %settings.corpus_id, "Knowledge base search enabled.");
            tools.register(Arc::new(KnowledgeBaseTool::new(settings)));
        }
        None => info!("RAG_CORPUS_ID not set; knowledge base search disabled."),
    }

    let connector = Arc::new(GeminiConnector::new(config.endpoint()));
    let bind_address = config.bind_address;
    info!(
        upstream = ?config.upstream,
        model = %config.model,
        voice = %config.voice_name,
        tools = %tools.names().join(", "),
        bind_address = %bind_address,
        "Service configured. Starting server..."
    );
    let app_state = Arc::new(AppState::new(
        config,
        connector,
        tools,
        Some(system_instruction),
    ));

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    let listener = tokio::net::TcpListener::bind(bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
