use secrecy::{ExposeSecret, SecretString};

const STUDIO_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Where a Live API session is opened and how it authenticates.
#[derive(Clone, Debug)]
pub enum Endpoint {
    /// Google AI Studio, authenticated with an API key query parameter.
    Studio { api_key: SecretString },
    /// Vertex AI, authenticated with an OAuth bearer token.
    Vertex {
        project: String,
        location: String,
        access_token: SecretString,
    },
}

impl Endpoint {
    /// WebSocket URL of the `BidiGenerateContent` service.
    pub fn url(&self) -> String {
        match self {
            Endpoint::Studio { api_key } => {
                format!("{STUDIO_URL}?key={}", api_key.expose_secret())
            }
            Endpoint::Vertex { location, .. } => format!(
                "wss://{location}-aiplatform.googleapis.com/ws/google.cloud.aiplatform.v1beta1.LlmBidiService/BidiGenerateContent"
            ),
        }
    }

    /// Fully qualified model resource name expected in the setup message.
    pub fn model_path(&self, model: &str) -> String {
        match self {
            Endpoint::Studio { .. } => {
                if model.starts_with("models/") {
                    model.to_string()
                } else {
                    format!("models/{model}")
                }
            }
            Endpoint::Vertex {
                project, location, ..
            } => {
                if model.starts_with("projects/") {
                    model.to_string()
                } else {
                    format!("projects/{project}/locations/{location}/publishers/google/models/{model}")
                }
            }
        }
    }

    pub(crate) fn bearer_token(&self) -> Option<&str> {
        match self {
            Endpoint::Studio { .. } => None,
            Endpoint::Vertex { access_token, .. } => Some(access_token.expose_secret()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex() -> Endpoint {
        Endpoint::Vertex {
            project: "demo".to_string(),
            location: "us-central1".to_string(),
            access_token: SecretString::from("ya29.secret"),
        }
    }

    #[test]
    fn test_studio_url_and_model_path() {
        let ep = Endpoint::Studio {
            api_key: SecretString::from("k123"),
        };
        assert!(ep.url().starts_with("wss://generativelanguage.googleapis.com/ws/"));
        assert!(ep.url().ends_with("?key=k123"));
        assert_eq!(ep.model_path("gemini-2.0-flash"), "models/gemini-2.0-flash");
        assert_eq!(ep.model_path("models/gemini-2.0-flash"), "models/gemini-2.0-flash");
        assert_eq!(ep.bearer_token(), None);
    }

    #[test]
    fn test_vertex_url_and_model_path() {
        let ep = vertex();
        assert_eq!(
            ep.url(),
            "wss://us-central1-aiplatform.googleapis.com/ws/google.cloud.aiplatform.v1beta1.LlmBidiService/BidiGenerateContent"
        );
        assert_eq!(
            ep.model_path("gemini-live-2.5-flash-native-audio"),
            "projects/demo/locations/us-central1/publishers/google/models/gemini-live-2.5-flash-native-audio"
        );
        assert_eq!(ep.bearer_token(), Some("ya29.secret"));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let studio = format!(
            "{:?}",
            Endpoint::Studio {
                api_key: SecretString::from("k123")
            }
        );
        assert!(!studio.contains("k123"));

        let vertex = format!("{:?}", vertex());
        assert!(vertex.contains("us-central1"));
        assert!(!vertex.contains("ya29.secret"));
    }
}
