use gemini_realtime::Endpoint;
use liverelay_core::relay::DEFAULT_CHUNK_SIZE;
use liverelay_core::tools::KnowledgeBaseSettings;
use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// Instruction used when `SYSTEM_INSTRUCTION_PATH` is not set.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful AI assistant connected via an audio Live API.
You have access to several tools. Please use them proactively when the user's request matches their function:
- get_current_weather: Use this to get the weather for a specific location.
- search_knowledge_base: Use this to search internal documents and guidelines.";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which Live API deployment the relay talks to.
#[derive(Clone, Debug)]
pub enum Upstream {
    Studio {
        api_key: SecretString,
    },
    Vertex {
        project: String,
        location: String,
        access_token: SecretString,
    },
}

/// Settings of the knowledge-base retrieval tool.
#[derive(Clone, Debug, PartialEq)]
pub struct RagConfig {
    pub project: String,
    pub location: String,
    pub corpus_id: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub model: String,
    pub voice_name: String,
    pub upstream: Upstream,
    pub access_token: Option<SecretString>,
    pub system_instruction_path: Option<PathBuf>,
    pub rag: Option<RagConfig>,
    pub audio_chunk_size: usize,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let model =
            var("LIVE_MODEL").unwrap_or_else(|| "gemini-live-2.5-flash-native-audio".to_string());
        let voice_name = var("VOICE_NAME").unwrap_or_else(|| "Puck".to_string());

        let project = var("GOOGLE_CLOUD_PROJECT");
        let location = var("GOOGLE_CLOUD_LOCATION").unwrap_or_else(|| "us-central1".to_string());
        let access_token = var("GOOGLE_ACCESS_TOKEN").map(SecretString::from);

        let upstream = match (var("GEMINI_API_KEY"), &project) {
            (Some(api_key), _) => Upstream::Studio {
                api_key: SecretString::from(api_key),
            },
            (None, Some(project)) => Upstream::Vertex {
                project: project.clone(),
                location: location.clone(),
                access_token: access_token.clone().ok_or_else(|| {
                    ConfigError::MissingVar(
                        "GOOGLE_ACCESS_TOKEN must be set for Vertex AI".to_string(),
                    )
                })?,
            },
            (None, None) => {
                return Err(ConfigError::MissingVar(
                    "GEMINI_API_KEY or GOOGLE_CLOUD_PROJECT".to_string(),
                ));
            }
        };

        let system_instruction_path = var("SYSTEM_INSTRUCTION_PATH").map(PathBuf::from);

        let rag = match var("RAG_CORPUS_ID") {
            Some(corpus_id) => {
                let project = project.clone().ok_or_else(|| {
                    ConfigError::MissingVar(
                        "GOOGLE_CLOUD_PROJECT must be set when RAG_CORPUS_ID is set".to_string(),
                    )
                })?;
                if access_token.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GOOGLE_ACCESS_TOKEN must be set when RAG_CORPUS_ID is set".to_string(),
                    ));
                }
                Some(RagConfig {
                    project,
                    location: var("RAG_LOCATION").unwrap_or_else(|| location.clone()),
                    corpus_id,
                })
            }
            None => None,
        };

        let audio_chunk_size = match var("AUDIO_CHUNK_SIZE") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "AUDIO_CHUNK_SIZE".to_string(),
                        format!("'{}' is not a positive integer", raw),
                    ));
                }
            },
            None => DEFAULT_CHUNK_SIZE,
        };

        Ok(Self {
            bind_address,
            log_level,
            model,
            voice_name,
            upstream,
            access_token,
            system_instruction_path,
            rag,
            audio_chunk_size,
        })
    }

    /// The Live API endpoint matching the configured upstream.
    pub fn endpoint(&self) -> Endpoint {
        match &self.upstream {
            Upstream::Studio { api_key } => Endpoint::Studio {
                api_key: api_key.clone(),
            },
            Upstream::Vertex {
                project,
                location,
                access_token,
            } => Endpoint::Vertex {
                project: project.clone(),
                location: location.clone(),
                access_token: access_token.clone(),
            },
        }
    }

    /// Retrieval tool settings, if a corpus is configured.
    pub fn knowledge_base(&self) -> Option<KnowledgeBaseSettings> {
        self.rag.as_ref().map(|rag| KnowledgeBaseSettings {
            project: rag.project.clone(),
            location: rag.location.clone(),
            corpus_id: rag.corpus_id.clone(),
            access_token: self.access_token.clone(),
            base_url: None,
        })
    }
}
