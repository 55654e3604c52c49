//! Manages the WebSocket connection lifecycle for a relay session.

use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use liverelay_core::relay::RelaySession;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Runs one relay session for a freshly upgraded connection.
///
/// The relay owns both socket halves and closes them before returning, so
/// nothing outlives this function.
#[instrument(name = "relay_session", skip_all, fields(connection_id = %Uuid::new_v4()))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("New WebSocket connection.");

    let (socket_tx, socket_rx) = socket.split();
    let mut relay = RelaySession::new(
        state.connector.clone(),
        state.tools.clone(),
        (*state.session_config).clone(),
    )
    .with_chunk_size(state.config.audio_chunk_size);

    let report = relay
        .run(client_audio(socket_rx), client_events(socket_tx))
        .await;

    info!(
        connected = report.connected,
        chunks_forwarded = report.chunks_forwarded,
        events_forwarded = report.events_forwarded,
        tool_calls_answered = report.tool_calls_answered,
        "Relay session finished."
    );
}

/// Adapts incoming WebSocket frames to the relay's audio stream.
///
/// Binary frames carry audio. A close frame ends the stream; text frames are
/// not audio and are skipped.
pub(crate) fn client_audio<S, E>(frames: S) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Message, E>>,
{
    frames
        .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Binary(data)) => Some(Ok(data)),
                Ok(Message::Text(_)) => {
                    warn!("Ignoring text frame; audio must be sent as binary frames.");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        })
}

/// Adapts the WebSocket sink so the relay can send serialized events as text frames.
pub(crate) fn client_events<S>(sink: S) -> impl Sink<String, Error = S::Error>
where
    S: Sink<Message>,
{
    sink.with(|event: String| future::ready(Ok(Message::Text(event.into()))))
}
