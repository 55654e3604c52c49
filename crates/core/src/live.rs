//! Upstream live session capability.
//!
//! The relay never talks to a provider directly. It opens sessions through a
//! [`LiveConnector`] and drives them through the [`LiveSession`] trait, so the
//! Gemini WebSocket client and the test doubles are interchangeable.
//!
//! Server messages are modelled loosely: every struct keeps the fields it does
//! not understand in a flattened `extra` map, which lets an event be forwarded
//! to the browser exactly as the provider sent it.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// MIME hint attached to every realtime audio chunk (PCM16, mono, 16 kHz).
pub const AUDIO_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Errors surfaced by a live session implementation.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("failed to connect to live session: {0}")]
    Connect(String),
    #[error("live session transport error: {0}")]
    Transport(String),
    #[error("malformed live session payload: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("live session is closed")]
    Closed,
}

/// Fixed configuration used when opening an upstream session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Model identifier, without any provider-specific path prefix.
    pub model: String,
    /// Prebuilt voice used for audio responses.
    pub voice_name: String,
    pub system_instruction: Option<String>,
    /// Declarations of every tool the model may call.
    pub tools: Vec<FunctionDeclaration>,
}

/// Declares a callable tool to the model.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON-schema-like object: `type`, `properties`, `required`.
    pub parameters: Value,
}

/// A single function invocation requested by the model.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    /// Empty when the provider sent no id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The answer to one [`FunctionCall`], correlated by `id`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VoiceActivity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_activity_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One message received from the upstream session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LiveServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_cancellation: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_activity: Option<VoiceActivity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_activity_detection_signal: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_away: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// The document as received, when decoded with [`LiveServerMessage::from_value`].
    #[serde(skip)]
    raw: Option<Value>,
}

/// Classification of a [`LiveServerMessage`], in the order the relay cares about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind<'a> {
    ToolCall(&'a ToolCall),
    VoiceActivity,
    ModelTurn(&'a Content),
    SetupComplete,
    Other,
}

impl LiveServerMessage {
    /// Decodes a provider message and keeps the original document for forwarding.
    pub fn from_value(raw: Value) -> Result<Self, serde_json::Error> {
        let mut message: Self = serde_json::from_value(raw.clone())?;
        message.raw = Some(raw);
        Ok(message)
    }

    /// JSON text sent to the client: the received document untouched, or the
    /// typed fields for messages built locally.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match &self.raw {
            Some(raw) => serde_json::to_string(raw),
            None => serde_json::to_string(self),
        }
    }

    pub fn kind(&self) -> EventKind<'_> {
        if let Some(tool_call) = &self.tool_call {
            return EventKind::ToolCall(tool_call);
        }
        if self.voice_activity.is_some() || self.voice_activity_detection_signal.is_some() {
            return EventKind::VoiceActivity;
        }
        if let Some(turn) = self
            .server_content
            .as_ref()
            .and_then(|content| content.model_turn.as_ref())
        {
            return EventKind::ModelTurn(turn);
        }
        if self.setup_complete.is_some() {
            return EventKind::SetupComplete;
        }
        EventKind::Other
    }

    /// Function calls the model is waiting on. Empty for every other kind of event.
    pub fn function_calls(&self) -> &[FunctionCall] {
        self.tool_call
            .as_ref()
            .map(|tool_call| tool_call.function_calls.as_slice())
            .unwrap_or_default()
    }
}

/// Opens upstream sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Establishes a session and waits until it is ready to stream.
    async fn connect(&self, config: &SessionConfig) -> Result<Arc<dyn LiveSession>, LiveError>;
}

/// A live upstream session. Implementations must accept concurrent calls from
/// the audio (inbound) and event (outbound) directions.
#[async_trait]
pub trait LiveSession: Send + Sync {
    async fn send_audio(&self, pcm: Bytes, mime_type: &str) -> Result<(), LiveError>;

    /// Pulls the next event. `Ok(None)` is a clean end of stream.
    async fn receive(&self) -> Result<Option<LiveServerMessage>, LiveError>;

    async fn send_tool_result(&self, response: FunctionResponse) -> Result<(), LiveError>;

    /// Releases the session. Calling it again has no effect.
    async fn close(&self) -> Result<(), LiveError>;
}
