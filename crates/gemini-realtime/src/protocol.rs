//! Client → server messages of the Live API.

use liverelay_core::live::{FunctionDeclaration, FunctionResponse, SessionConfig};
use serde::Serialize;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    pub explicit_vad_signal: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum ResponseModality {
    Audio,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug)]
pub(crate) struct Content {
    pub parts: Vec<Part>,
}

#[derive(Serialize, Debug)]
pub(crate) struct Part {
    pub text: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Serialize, Debug)]
pub(crate) struct RealtimeInput {
    pub audio: Blob,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Blob {
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

impl ClientMessage {
    /// Builds the opening `setup` message: audio responses, a prebuilt voice,
    /// explicit VAD signalling and every declared tool.
    pub(crate) fn setup(model_path: String, config: &SessionConfig) -> Self {
        let tools = if config.tools.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: config.tools.clone(),
            }]
        };

        ClientMessage::Setup(Setup {
            model: model_path,
            generation_config: GenerationConfig {
                response_modalities: vec![ResponseModality::Audio],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction: config
                .system_instruction
                .as_ref()
                .filter(|text| !text.trim().is_empty())
                .map(|text| Content {
                    parts: vec![Part { text: text.clone() }],
                }),
            tools,
            explicit_vad_signal: true,
        })
    }

    pub(crate) fn audio(mime_type: &str, data: String) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: Blob {
                mime_type: mime_type.to_string(),
                data,
            },
        })
    }

    pub(crate) fn tool_response(response: FunctionResponse) -> Self {
        ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![response],
        })
    }
}
