use super::{ToolHandler, error_result};
use crate::live::FunctionDeclaration;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::info;

/// Reports the current weather for a location. Returns mock data.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeatherTool;

impl WeatherTool {
    pub const NAME: &'static str = "get_current_weather";
}

#[async_trait]
impl ToolHandler for WeatherTool {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: Self::NAME.to_string(),
            description: "Get the current weather in a given location".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "The city and state, e.g. San Francisco, CA"
                    }
                },
                "required": ["location"]
            }),
        }
    }

    async fn call(&self, args: &Map<String, Value>) -> Map<String, Value> {
        let Some(location) = args.get("location").and_then(Value::as_str) else {
            return error_result("location argument is required and must be a string");
        };
        info!(%location, "Looking up weather");

        let mut result = Map::new();
        result.insert("weather".to_string(), json!("Sunny"));
        result.insert("temperature".to_string(), json!(25));
        result.insert("location".to_string(), json!(location));
        result.insert(
            "note".to_string(),
            json!("This is mock data from the backend tool"),
        );
        result
    }
}
