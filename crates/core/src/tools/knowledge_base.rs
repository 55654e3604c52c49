//! Knowledge-base retrieval backed by the Vertex AI RAG Engine.
//!
//! The tool calls `retrieveContexts` against a single configured corpus and
//! hands the matching passages back to the model.

use super::{ToolHandler, error_result};
use crate::live::FunctionDeclaration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{error, info};

const TOP_K: u32 = 5;
const VECTOR_DISTANCE_THRESHOLD: f64 = 0.5;

/// Where the retrieval corpus lives.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseSettings {
    pub project: String,
    pub location: String,
    pub corpus_id: String,
    /// OAuth bearer token sent with every request, if any.
    pub access_token: Option<SecretString>,
    /// Overrides `https://{location}-aiplatform.googleapis.com`.
    pub base_url: Option<String>,
}

impl KnowledgeBaseSettings {
    fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.location)
    }

    fn corpus_name(&self) -> String {
        format!("{}/ragCorpora/{}", self.parent(), self.corpus_id)
    }

    fn endpoint(&self) -> String {
        let base = self
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", self.location));
        format!(
            "{}/v1/{}:retrieveContexts",
            base.trim_end_matches('/'),
            self.parent()
        )
    }
}

/// One retrieved passage, in the shape returned to the model.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RetrievedContext {
    pub text: String,
    pub source_uri: String,
    pub distance: f64,
}

#[derive(Deserialize, Debug, Default)]
struct RetrieveContextsResponse {
    #[serde(default)]
    contexts: Option<RagContexts>,
}

#[derive(Deserialize, Debug, Default)]
struct RagContexts {
    #[serde(default)]
    contexts: Vec<RagContext>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RagContext {
    #[serde(default)]
    text: String,
    #[serde(default)]
    source_uri: String,
    #[serde(default)]
    score: Option<f64>,
}

/// Searches the internal knowledge base.
pub struct KnowledgeBaseTool {
    client: reqwest::Client,
    settings: KnowledgeBaseSettings,
}

impl KnowledgeBaseTool {
    pub const NAME: &'static str = "search_knowledge_base";

    pub fn new(settings: KnowledgeBaseSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedContext>> {
        let body = json!({
            "vertexRagStore": {
                "ragResources": [{ "ragCorpus": self.settings.corpus_name() }]
            },
            "query": {
                "text": query,
                "ragRetrievalConfig": {
                    "topK": TOP_K,
                    "filter": { "vectorDistanceThreshold": VECTOR_DISTANCE_THRESHOLD }
                }
            }
        });

        let mut request = self.client.post(self.settings.endpoint()).json(&body);
        if let Some(token) = &self.settings.access_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response: RetrieveContextsResponse = request
            .send()
            .await
            .context("failed to reach retrieval backend")?
            .error_for_status()
            .context("retrieval backend rejected the request")?
            .json()
            .await
            .context("failed to decode retrieval response")?;

        Ok(response
            .contexts
            .unwrap_or_default()
            .contexts
            .into_iter()
            .map(|ctx| RetrievedContext {
                text: ctx.text,
                source_uri: ctx.source_uri,
                distance: ctx.score.unwrap_or(0.0),
            })
            .collect())
    }
}

#[async_trait]
impl ToolHandler for KnowledgeBaseTool {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: Self::NAME.to_string(),
            description: "Retrieves information from the internal knowledge base.\n\n\
IMPORTANT: When generating the 'query' argument, follow these rules:\n\
1. Reformulate the prompt to a concise, fully specified and context-independent query.\n\
2. Include time information to the query if the prompt is time sensitive.\n\
3. Include location information to the query if the prompt is location sensitive.\n\
4. Never ask for clarification."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The reformulated search query."
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: &Map<String, Value>) -> Map<String, Value> {
        let Some(query) = args.get("query").and_then(Value::as_str) else {
            return error_result("query argument is required and must be a string");
        };
        info!(%query, corpus = %self.settings.corpus_id, "Searching knowledge base");

        match self.retrieve(query).await {
            Ok(contexts) => {
                info!(found = contexts.len(), "Knowledge base search finished");
                let mut result = Map::new();
                result.insert("contexts".to_string(), json!(contexts));
                result
            }
            Err(e) => {
                error!(error = ?e, "Knowledge base search failed");
                error_result(format!("{e:#}"))
            }
        }
    }
}
