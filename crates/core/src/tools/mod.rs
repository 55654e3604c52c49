//! Tool registry and built-in tool handlers.
//!
//! A registry is an explicit value built at startup and shared by reference;
//! there is no global registration. Tool failures never escape the registry:
//! they are reported to the model as an `{"error": ...}` result instead.

pub mod knowledge_base;
pub mod weather;

use crate::live::FunctionDeclaration;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub use knowledge_base::{KnowledgeBaseSettings, KnowledgeBaseTool};
pub use weather::WeatherTool;

/// Result returned for a call to a name nobody registered.
pub const UNKNOWN_FUNCTION: &str = "Unknown function";

/// A callable tool exposed to the model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Name, description and parameter schema announced to the model.
    fn declaration(&self) -> FunctionDeclaration;

    /// Runs the tool. Validation and backend failures are returned as an error
    /// mapping built with [`error_result`].
    async fn call(&self, args: &Map<String, Value>) -> Map<String, Value>;
}

/// Builds the `{"error": message}` mapping used for every tool failure.
pub fn error_result(message: impl Into<String>) -> Map<String, Value> {
    let mut result = Map::new();
    result.insert("error".to_string(), Value::String(message.into()));
    result
}

/// Maps tool names to handlers.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its declared name, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.declaration().name;
        if self.handlers.insert(name.clone(), handler).is_some() {
            warn!(tool = %name, "Replacing previously registered tool handler");
        } else {
            self.order.push(name);
        }
    }

    /// Declarations of every registered tool, in registration order.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        self.order
            .iter()
            .filter_map(|name| self.handlers.get(name))
            .map(|handler| handler.declaration())
            .collect()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Executes the tool registered under `name`.
    ///
    /// The call may be slow (handlers can reach remote backends); callers on a
    /// latency-sensitive path should account for that. It never fails: an
    /// unknown name yields `{"error": "Unknown function"}`.
    pub async fn execute(&self, name: &str, args: &Map<String, Value>) -> Map<String, Value> {
        match self.handlers.get(name) {
            Some(handler) => {
                info!(tool = %name, "Executing tool");
                handler.call(args).await
            }
            None => {
                warn!(tool = %name, "Model requested an unregistered tool");
                error_result(UNKNOWN_FUNCTION)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn declaration(name: &str) -> FunctionDeclaration {
        FunctionDeclaration {
            name: name.to_string(),
            description: format!("{name} tool"),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    fn mock_tool(name: &'static str) -> MockToolHandler {
        let mut mock = MockToolHandler::new();
        mock.expect_declaration()
            .returning(move || declaration(name));
        mock
    }

    #[tokio::test]
    async fn test_unknown_tool_returns_error_mapping() {
        let registry = ToolRegistry::new();
        let result = registry.execute("does_not_exist", &Map::new()).await;
        assert_eq!(result.get("error"), Some(&json!("Unknown function")));
    }

    #[tokio::test]
    async fn test_execute_dispatches_by_exact_name() {
        let mut tool = mock_tool("f1");
        tool.expect_call()
            .withf(|args| args.get("x") == Some(&json!(1)))
            .times(1)
            .returning(|_| {
                let mut out = Map::new();
                out.insert("ok".to_string(), json!(true));
                out
            });

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(tool));

        let mut args = Map::new();
        args.insert("x".to_string(), json!(1));
        let result = registry.execute("f1", &args).await;
        assert_eq!(result.get("ok"), Some(&json!(true)));

        let miss = registry.execute("F1", &args).await;
        assert_eq!(miss.get("error"), Some(&json!(UNKNOWN_FUNCTION)));
    }

    #[test]
    fn test_declarations_follow_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(mock_tool("b")));
        registry.register(Arc::new(mock_tool("a")));
        registry.register(Arc::new(mock_tool("b")));

        assert_eq!(registry.len(), 2);
        let names: Vec<String> = registry
            .declarations()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(registry.names(), &["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_independent_registries() {
        let mut first = ToolRegistry::new();
        first.register(Arc::new(WeatherTool));
        let second = ToolRegistry::new();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }
}
