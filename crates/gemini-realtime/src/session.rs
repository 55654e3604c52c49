//! Live API session over tokio-tungstenite.

use crate::{endpoint::Endpoint, protocol::ClientMessage};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use liverelay_core::live::{
    FunctionResponse, LiveConnector, LiveError, LiveServerMessage, LiveSession, SessionConfig,
};
use serde_json::Value;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Error as WsError,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
        protocol::Message as WsMessage,
    },
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long Gemini gets to acknowledge the setup message.
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Opens Gemini Live sessions against a fixed endpoint.
#[derive(Debug, Clone)]
pub struct GeminiConnector {
    endpoint: Endpoint,
    url_override: Option<String>,
    setup_timeout: Duration,
}

impl GeminiConnector {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            url_override: None,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
        }
    }

    /// Connects to `url` instead of the endpoint's public URL (proxies, local servers).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url_override = Some(url.into());
        self
    }

    pub fn with_setup_timeout(mut self, setup_timeout: Duration) -> Self {
        self.setup_timeout = setup_timeout;
        self
    }
}

#[async_trait]
impl LiveConnector for GeminiConnector {
    async fn connect(&self, config: &SessionConfig) -> Result<Arc<dyn LiveSession>, LiveError> {
        let url = self
            .url_override
            .clone()
            .unwrap_or_else(|| self.endpoint.url());
        let session =
            GeminiSession::open(&url, &self.endpoint, config, self.setup_timeout).await?;
        Ok(Arc::new(session))
    }
}

/// What a single WebSocket frame meant for the session.
enum Frame {
    Message(LiveServerMessage),
    Closed,
    Skip,
}

fn decode(message: WsMessage) -> Frame {
    let parsed = match message {
        WsMessage::Text(text) => serde_json::from_str::<Value>(text.as_str()),
        WsMessage::Binary(data) => serde_json::from_slice::<Value>(&data),
        WsMessage::Close(frame) => {
            info!(?frame, "Gemini closed the live session.");
            return Frame::Closed;
        }
        _ => return Frame::Skip,
    };
    match parsed.and_then(LiveServerMessage::from_value) {
        Ok(message) => Frame::Message(message),
        Err(e) => {
            warn!(error = %e, "Skipping undecodable message from Gemini");
            Frame::Skip
        }
    }
}

async fn wait_for_setup_complete(reader: &mut SplitStream<WsStream>) -> Result<(), LiveError> {
    loop {
        match reader.next().await {
            Some(Ok(message)) => match decode(message) {
                Frame::Message(message) if message.setup_complete.is_some() => return Ok(()),
                Frame::Message(message) => {
                    warn!(?message, "Unexpected message before setup completed");
                }
                Frame::Closed => {
                    return Err(LiveError::Connect(
                        "session closed before setup completed".to_string(),
                    ));
                }
                Frame::Skip => {}
            },
            Some(Err(e)) => return Err(LiveError::Connect(e.to_string())),
            None => {
                return Err(LiveError::Connect(
                    "connection ended before setup completed".to_string(),
                ));
            }
        }
    }
}

/// One live session. Writes and reads are serialized independently, so audio
/// and tool responses can be sent while another task waits on `receive`.
pub struct GeminiSession {
    writer: Mutex<SplitSink<WsStream, WsMessage>>,
    reader: Mutex<SplitStream<WsStream>>,
    closed: AtomicBool,
}

impl GeminiSession {
    /// Connects, sends the setup message and waits up to `setup_timeout` for
    /// `setupComplete`.
    pub async fn open(
        url: &str,
        endpoint: &Endpoint,
        config: &SessionConfig,
        setup_timeout: Duration,
    ) -> Result<Self, LiveError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| LiveError::Connect(e.to_string()))?;
        if let Some(token) = endpoint.bearer_token() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| LiveError::Connect(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| LiveError::Connect(e.to_string()))?;
        info!(model = %config.model, "Connected to Gemini Live WebSocket.");
        let (mut writer, mut reader) = ws_stream.split();

        let setup = ClientMessage::setup(endpoint.model_path(&config.model), config);
        writer
            .send(WsMessage::Text(serde_json::to_string(&setup)?.into()))
            .await
            .map_err(|e| LiveError::Connect(e.to_string()))?;

        tokio::time::timeout(setup_timeout, wait_for_setup_complete(&mut reader))
            .await
            .map_err(|_| {
                LiveError::Connect(format!(
                    "setup was not acknowledged within {setup_timeout:?}"
                ))
            })??;
        info!("Gemini session setup is complete. Ready for bidirectional streaming.");

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            closed: AtomicBool::new(false),
        })
    }

    async fn send(&self, message: &ClientMessage) -> Result<(), LiveError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LiveError::Closed);
        }
        let payload = serde_json::to_string(message)?;
        self.writer
            .lock()
            .await
            .send(WsMessage::Text(payload.into()))
            .await
            .map_err(|e| LiveError::Transport(e.to_string()))
    }
}

#[async_trait]
impl LiveSession for GeminiSession {
    async fn send_audio(&self, pcm: Bytes, mime_type: &str) -> Result<(), LiveError> {
        let data = base64::engine::general_purpose::STANDARD.encode(&pcm);
        self.send(&ClientMessage::audio(mime_type, data)).await
    }

    async fn receive(&self) -> Result<Option<LiveServerMessage>, LiveError> {
        let mut reader = self.reader.lock().await;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            match reader.next().await {
                Some(Ok(message)) => match decode(message) {
                    Frame::Message(message) => return Ok(Some(message)),
                    Frame::Closed => return Ok(None),
                    Frame::Skip => {}
                },
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Ok(None);
                }
                Some(Err(_)) if self.closed.load(Ordering::SeqCst) => return Ok(None),
                Some(Err(e)) => return Err(LiveError::Transport(e.to_string())),
            }
        }
    }

    async fn send_tool_result(&self, response: FunctionResponse) -> Result<(), LiveError> {
        self.send(&ClientMessage::tool_response(response)).await
    }

    async fn close(&self) -> Result<(), LiveError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.writer.lock().await.close().await {
            debug!(error = %e, "Gemini WebSocket was already closed");
        }
        info!("Gemini live session closed.");
        Ok(())
    }
}
