//! Per-connection relay between a browser client and an upstream live session.
//!
//! A [`RelaySession`] moves through `Connecting → Active → Closing → Closed`.
//! While active it runs two units that share one cancellation token:
//!
//! - the outbound unit (spawned task) pulls upstream events, answers any tool
//!   calls inline through the [`ToolRegistry`], then forwards the event to the
//!   client as JSON;
//! - the inbound unit (the caller's task) reads client audio in bounded chunks
//!   and pushes each chunk upstream.
//!
//! Whichever unit stops first cancels the token; the other notices it at its
//! next await point. Nothing escapes the session: failures are logged and end
//! with the client transport being closed.

use crate::live::{
    AUDIO_MIME_TYPE, EventKind, FunctionCall, FunctionResponse, LiveConnector, LiveServerMessage,
    LiveSession, SessionConfig,
};
use crate::tools::ToolRegistry;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Largest audio chunk forwarded upstream in one call.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Summary of a finished relay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub state: RelayState,
    /// Whether the upstream session was ever established.
    pub connected: bool,
    pub chunks_forwarded: usize,
    pub events_forwarded: usize,
    pub tool_calls_answered: usize,
}

pub struct RelaySession {
    connector: Arc<dyn LiveConnector>,
    tools: Arc<ToolRegistry>,
    config: SessionConfig,
    chunk_size: usize,
    state: RelayState,
}

struct OutboundOutcome<O> {
    sink: O,
    events_forwarded: usize,
    tool_calls_answered: usize,
}

impl RelaySession {
    pub fn new(
        connector: Arc<dyn LiveConnector>,
        tools: Arc<ToolRegistry>,
        config: SessionConfig,
    ) -> Self {
        Self {
            connector,
            tools,
            config,
            chunk_size: DEFAULT_CHUNK_SIZE,
            state: RelayState::Connecting,
        }
    }

    /// Sets the bounded read size for client audio. Zero is treated as one byte.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    fn transition(&mut self, next: RelayState) {
        debug!(from = ?self.state, to = ?next, "Relay state transition");
        self.state = next;
    }

    /// Runs the relay to completion.
    ///
    /// `inbound` yields raw PCM frames from the client; `outbound` receives one
    /// JSON document per upstream event. Both are closed or dropped when this
    /// returns.
    pub async fn run<I, E, O>(&mut self, inbound: I, mut outbound: O) -> RelayReport
    where
        I: Stream<Item = Result<Bytes, E>>,
        E: Display,
        O: Sink<String> + Unpin + Send + 'static,
        O::Error: Display,
    {
        self.transition(RelayState::Connecting);
        info!(model = %self.config.model, tools = self.tools.len(), "Connecting to upstream live session");

        let session = match self.connector.connect(&self.config).await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Failed to connect to upstream live session");
                if let Err(e) = outbound.close().await {
                    debug!(error = %e, "Client transport already closed");
                }
                self.transition(RelayState::Closed);
                return RelayReport {
                    state: self.state,
                    connected: false,
                    chunks_forwarded: 0,
                    events_forwarded: 0,
                    tool_calls_answered: 0,
                };
            }
        };

        self.transition(RelayState::Active);
        info!("Upstream live session established. Relaying.");
        let done = CancellationToken::new();

        let outbound_unit = tokio::spawn(
            forward_upstream_events(session.clone(), self.tools.clone(), outbound, done.clone())
                .in_current_span(),
        );
        let chunks_forwarded =
            forward_client_audio(session.as_ref(), inbound, self.chunk_size, &done).await;
        done.cancel();

        self.transition(RelayState::Closing);
        if let Err(e) = session.close().await {
            warn!(error = %e, "Error while closing upstream live session");
        }

        let (events_forwarded, tool_calls_answered) = match outbound_unit.await {
            Ok(OutboundOutcome {
                mut sink,
                events_forwarded,
                tool_calls_answered,
            }) => {
                if let Err(e) = sink.close().await {
                    debug!(error = %e, "Client transport already closed");
                }
                (events_forwarded, tool_calls_answered)
            }
            Err(e) => {
                error!(error = %e, "Outbound relay task failed");
                (0, 0)
            }
        };

        self.transition(RelayState::Closed);
        RelayReport {
            state: self.state,
            connected: true,
            chunks_forwarded,
            events_forwarded,
            tool_calls_answered,
        }
    }
}

/// Client → upstream. Returns the number of chunks forwarded.
async fn forward_client_audio<I, E>(
    session: &dyn LiveSession,
    inbound: I,
    chunk_size: usize,
    done: &CancellationToken,
) -> usize
where
    I: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut inbound = std::pin::pin!(inbound);
    let mut forwarded = 0;

    'read: loop {
        let frame = tokio::select! {
            biased;
            _ = done.cancelled() => {
                debug!("Upstream side finished; stopping audio forwarding.");
                break;
            }
            frame = inbound.next() => frame,
        };

        let data = match frame {
            Some(Ok(data)) => data,
            Some(Err(e)) => {
                warn!(error = %e, "Error reading from client transport");
                break;
            }
            None => {
                info!("Client closed the connection.");
                break;
            }
        };

        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + chunk_size).min(data.len());
            let chunk = data.slice(offset..end);
            offset = end;

            if let Err(e) = session.send_audio(chunk, AUDIO_MIME_TYPE).await {
                error!(error = %e, "Failed to send audio upstream");
                break 'read;
            }
            forwarded += 1;

            if done.is_cancelled() {
                debug!("Upstream side finished; dropping remaining audio.");
                break 'read;
            }
        }
    }

    done.cancel();
    forwarded
}

/// Upstream → client, answering tool calls before each event is forwarded.
async fn forward_upstream_events<O>(
    session: Arc<dyn LiveSession>,
    tools: Arc<ToolRegistry>,
    mut sink: O,
    done: CancellationToken,
) -> OutboundOutcome<O>
where
    O: Sink<String> + Unpin,
    O::Error: Display,
{
    let mut events_forwarded = 0;
    let mut tool_calls_answered = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = done.cancelled() => {
                debug!("Client side finished; stopping event forwarding.");
                break;
            }
            next = session.receive() => next,
        };

        let event = match next {
            Ok(Some(event)) => event,
            Ok(None) => {
                info!("Upstream live session ended.");
                break;
            }
            Err(e) => {
                error!(error = %e, "Error receiving from upstream live session");
                break;
            }
        };

        log_event(&event);
        for call in event.function_calls() {
            if answer_tool_call(session.as_ref(), &tools, call).await {
                tool_calls_answered += 1;
            }
        }

        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Dropping upstream event that failed to serialize");
                continue;
            }
        };
        if let Err(e) = sink.send(payload).await {
            warn!(error = %e, "Failed to write event to client");
            break;
        }
        events_forwarded += 1;
    }

    done.cancel();
    OutboundOutcome {
        sink,
        events_forwarded,
        tool_calls_answered,
    }
}

fn log_event(event: &LiveServerMessage) {
    match event.kind() {
        EventKind::VoiceActivity => {
            if let Some(activity) = &event.voice_activity {
                info!(activity_type = ?activity.voice_activity_type, "Voice activity notification");
            }
            if let Some(signal) = &event.voice_activity_detection_signal {
                info!(%signal, "Voice activity detection signal");
            }
        }
        EventKind::ModelTurn(turn) => {
            for part in &turn.parts {
                if let Some(call) = &part.function_call {
                    warn!(tool = %call.name, "Function call echoed in model turn; not executed");
                }
            }
        }
        EventKind::ToolCall(_) | EventKind::SetupComplete | EventKind::Other => {}
    }
}

async fn answer_tool_call(session: &dyn LiveSession, tools: &ToolRegistry, call: &FunctionCall) -> bool {
    info!(tool = %call.name, call_id = %call.id, "Received tool call");
    let args = call.args.clone().unwrap_or_default();
    let result = tools.execute(&call.name, &args).await;

    let response = FunctionResponse {
        id: call.id.clone(),
        name: call.name.clone(),
        response: result,
    };
    match session.send_tool_result(response).await {
        Ok(()) => {
            debug!(tool = %call.name, call_id = %call.id, "Sent tool response");
            true
        }
        Err(e) => {
            error!(error = %e, tool = %call.name, call_id = %call.id, "Failed to send tool response");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{LiveError, MockLiveConnector};
    use crate::tools::{ToolHandler, WeatherTool};
    use async_trait::async_trait;
    use futures::channel::mpsc as client_channel;
    use futures::stream;
    use serde_json::{Value, json};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{Mutex, mpsc};

    type Scripted = Result<Option<LiveServerMessage>, LiveError>;

    /// Upstream double: replays scripted events and records every call.
    struct FakeSession {
        events: Mutex<mpsc::UnboundedReceiver<Scripted>>,
        closed: CancellationToken,
        close_calls: AtomicUsize,
        log: StdMutex<Vec<String>>,
        audio: StdMutex<Vec<(usize, String)>>,
        tool_results: StdMutex<Vec<FunctionResponse>>,
    }

    impl FakeSession {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<Scripted>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let session = Arc::new(Self {
                events: Mutex::new(rx),
                closed: CancellationToken::new(),
                close_calls: AtomicUsize::new(0),
                log: StdMutex::new(Vec::new()),
                audio: StdMutex::new(Vec::new()),
                tool_results: StdMutex::new(Vec::new()),
            });
            (session, tx)
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn audio_lengths(&self) -> Vec<usize> {
            self.audio.lock().unwrap().iter().map(|(len, _)| *len).collect()
        }
    }

    #[async_trait]
    impl LiveSession for FakeSession {
        async fn send_audio(&self, pcm: Bytes, mime_type: &str) -> Result<(), LiveError> {
            self.audio
                .lock()
                .unwrap()
                .push((pcm.len(), mime_type.to_string()));
            Ok(())
        }

        async fn receive(&self) -> Result<Option<LiveServerMessage>, LiveError> {
            self.log.lock().unwrap().push("recv".to_string());
            let mut events = self.events.lock().await;
            tokio::select! {
                _ = self.closed.cancelled() => Ok(None),
                next = events.recv() => next.unwrap_or(Ok(None)),
            }
        }

        async fn send_tool_result(&self, response: FunctionResponse) -> Result<(), LiveError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("tool:{}", response.id));
            self.tool_results.lock().unwrap().push(response);
            Ok(())
        }

        async fn close(&self) -> Result<(), LiveError> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.cancel();
            Ok(())
        }
    }

    struct FakeConnector(Arc<FakeSession>);

    #[async_trait]
    impl LiveConnector for FakeConnector {
        async fn connect(
            &self,
            _config: &SessionConfig,
        ) -> Result<Arc<dyn LiveSession>, LiveError> {
            Ok(self.0.clone())
        }
    }

    /// Registered tool `f1` that always succeeds.
    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn declaration(&self) -> crate::live::FunctionDeclaration {
            crate::live::FunctionDeclaration {
                name: "f1".to_string(),
                description: "echo".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        async fn call(&self, args: &serde_json::Map<String, Value>) -> serde_json::Map<String, Value> {
            let mut out = serde_json::Map::new();
            out.insert("echo".to_string(), Value::Object(args.clone()));
            out
        }
    }

    fn session_config() -> SessionConfig {
        SessionConfig {
            model: "test-model".to_string(),
            voice_name: "Puck".to_string(),
            system_instruction: None,
            tools: vec![],
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        tools.register(Arc::new(WeatherTool));
        Arc::new(tools)
    }

    fn relay_for(session: &Arc<FakeSession>) -> RelaySession {
        RelaySession::new(
            Arc::new(FakeConnector(session.clone())),
            registry(),
            session_config(),
        )
    }

    fn event(value: Value) -> LiveServerMessage {
        LiveServerMessage::from_value(value).unwrap()
    }

    fn frames(sizes: &[usize]) -> Vec<Result<Bytes, std::io::Error>> {
        sizes.iter().map(|n| Ok(Bytes::from(vec![0u8; *n]))).collect()
    }

    async fn run_with_timeout<I>(
        relay: &mut RelaySession,
        inbound: I,
        outbound: client_channel::UnboundedSender<String>,
    ) -> RelayReport
    where
        I: Stream<Item = Result<Bytes, std::io::Error>>,
    {
        tokio::time::timeout(Duration::from_secs(5), relay.run(inbound, outbound))
            .await
            .expect("relay did not shut down")
    }

    #[tokio::test]
    async fn test_two_function_calls_answered_before_next_event() {
        let (session, script) = FakeSession::new();
        script
            .send(Ok(Some(event(json!({
                "toolCall": {"functionCalls": [
                    {"id": "c1", "name": "f1", "args": {"q": "x"}},
                    {"id": "c2", "name": "f2"}
                ]}
            })))))
            .unwrap();
        script
            .send(Ok(Some(event(json!({
                "serverContent": {"modelTurn": {"parts": [{"text": "done"}]}}
            })))))
            .unwrap();
        script.send(Ok(None)).unwrap();

        let (client_tx, client_rx) = client_channel::unbounded();
        let mut relay = relay_for(&session);
        let report = run_with_timeout(&mut relay, stream::pending(), client_tx).await;

        assert_eq!(report.state, RelayState::Closed);
        assert_eq!(relay.state(), RelayState::Closed);
        assert_eq!(report.tool_calls_answered, 2);
        assert_eq!(report.events_forwarded, 2);

        let results = session.tool_results.lock().unwrap().clone();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "c1");
        assert_eq!(results[0].name, "f1");
        assert_eq!(results[0].response.get("echo"), Some(&json!({"q": "x"})));
        assert_eq!(results[1].id, "c2");
        assert_eq!(
            results[1].response.get("error"),
            Some(&json!("Unknown function"))
        );

        let log = session.log();
        assert_eq!(&log[..4], &["recv", "tool:c1", "tool:c2", "recv"]);

        let forwarded: Vec<Value> = client_rx
            .map(|text| serde_json::from_str(&text).unwrap())
            .collect()
            .await;
        assert_eq!(forwarded.len(), 2);
        assert!(forwarded[0].get("toolCall").is_some());
        assert_eq!(
            forwarded[1]["serverContent"]["modelTurn"]["parts"][0]["text"],
            json!("done")
        );
    }

    #[tokio::test]
    async fn test_three_chunks_then_client_disconnect() {
        let (session, _script) = FakeSession::new();
        let (client_tx, client_rx) = client_channel::unbounded();
        let mut relay = relay_for(&session);

        let report = run_with_timeout(
            &mut relay,
            stream::iter(frames(&[4096, 4096, 100])),
            client_tx,
        )
        .await;

        assert_eq!(session.audio_lengths(), vec![4096, 4096, 100]);
        assert!(
            session
                .audio
                .lock()
                .unwrap()
                .iter()
                .all(|(_, mime)| mime == AUDIO_MIME_TYPE)
        );
        assert_eq!(report.chunks_forwarded, 3);
        assert_eq!(report.events_forwarded, 0);
        assert_eq!(report.state, RelayState::Closed);
        assert_eq!(session.close_calls.load(Ordering::SeqCst), 1);
        assert!(client_rx.collect::<Vec<_>>().await.is_empty());
    }

    #[tokio::test]
    async fn test_large_frame_is_split_into_bounded_chunks() {
        let (session, _script) = FakeSession::new();
        let (client_tx, _client_rx) = client_channel::unbounded();
        let mut relay = relay_for(&session);

        let report = run_with_timeout(
            &mut relay,
            stream::iter(frames(&[8292, 0, 10])),
            client_tx,
        )
        .await;

        assert_eq!(session.audio_lengths(), vec![4096, 4096, 100, 10]);
        assert_eq!(report.chunks_forwarded, 4);
    }

    #[tokio::test]
    async fn test_custom_chunk_size() {
        let (session, _script) = FakeSession::new();
        let (client_tx, _client_rx) = client_channel::unbounded();
        let mut relay = relay_for(&session).with_chunk_size(1024);

        run_with_timeout(&mut relay, stream::iter(frames(&[2500])), client_tx).await;

        assert_eq!(session.audio_lengths(), vec![1024, 1024, 452]);
    }

    #[tokio::test]
    async fn test_connect_failure_closes_client_without_forwarding() {
        let mut connector = MockLiveConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_| Err(LiveError::Connect("simulated".to_string())));

        let mut relay = RelaySession::new(Arc::new(connector), registry(), session_config());
        let (client_tx, client_rx) = client_channel::unbounded();

        let report =
            run_with_timeout(&mut relay, stream::iter(frames(&[4096])), client_tx).await;

        assert_eq!(report.state, RelayState::Closed);
        assert!(!report.connected);
        assert_eq!(report.chunks_forwarded, 0);
        assert_eq!(report.events_forwarded, 0);
        assert!(client_rx.collect::<Vec<_>>().await.is_empty());
    }

    #[tokio::test]
    async fn test_upstream_error_stops_inbound_unit() {
        let (session, script) = FakeSession::new();
        script
            .send(Err(LiveError::Transport("connection reset".to_string())))
            .unwrap();

        let (client_tx, _client_rx) = client_channel::unbounded();
        let mut relay = relay_for(&session);
        let report = run_with_timeout(&mut relay, stream::pending(), client_tx).await;

        assert_eq!(report.state, RelayState::Closed);
        assert_eq!(report.chunks_forwarded, 0);
        assert_eq!(session.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_write_failure_ends_outbound_unit() {
        let (session, script) = FakeSession::new();
        script
            .send(Ok(Some(event(json!({"setupComplete": {}})))))
            .unwrap();

        let (client_tx, client_rx) = client_channel::unbounded();
        drop(client_rx);
        let mut relay = relay_for(&session);
        let report = run_with_timeout(&mut relay, stream::pending(), client_tx).await;

        assert_eq!(report.events_forwarded, 0);
        assert_eq!(report.state, RelayState::Closed);
    }

    #[tokio::test]
    async fn test_client_read_error_ends_inbound_unit() {
        let (session, _script) = FakeSession::new();
        let inbound = stream::iter(vec![
            Ok(Bytes::from(vec![1u8; 64])),
            Err(std::io::Error::other("socket reset")),
            Ok(Bytes::from(vec![1u8; 64])),
        ]);
        let (client_tx, _client_rx) = client_channel::unbounded();
        let mut relay = relay_for(&session);

        let report = run_with_timeout(&mut relay, inbound, client_tx).await;

        assert_eq!(session.audio_lengths(), vec![64]);
        assert_eq!(report.chunks_forwarded, 1);
    }

    #[tokio::test]
    async fn test_audio_stops_once_upstream_is_done() {
        let (session, script) = FakeSession::new();
        script.send(Ok(None)).unwrap();

        // A client that keeps streaming forever.
        let inbound = stream::repeat_with(|| Ok::<_, std::io::Error>(Bytes::from(vec![0u8; 320])))
            .then(|frame| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                frame
            });
        let (client_tx, _client_rx) = client_channel::unbounded();
        let mut relay = relay_for(&session);

        let report = run_with_timeout(&mut relay, inbound, client_tx).await;

        assert_eq!(report.state, RelayState::Closed);
        assert_eq!(session.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_events_reach_client_exactly_as_received() {
        let (session, script) = FakeSession::new();
        let raw = json!({
            "toolCall": {"functionCalls": [{"name": "f1", "args": {"q": "x"}}]},
            "usageMetadata": null
        });
        script.send(Ok(Some(event(raw.clone())))).unwrap();
        script.send(Ok(None)).unwrap();

        let (client_tx, client_rx) = client_channel::unbounded();
        let mut relay = relay_for(&session);
        let report = run_with_timeout(&mut relay, stream::pending(), client_tx).await;

        assert_eq!(report.tool_calls_answered, 1);
        let results = session.tool_results.lock().unwrap().clone();
        assert_eq!(results[0].id, "");
        assert_eq!(results[0].name, "f1");

        let forwarded: Vec<Value> = client_rx
            .map(|text| serde_json::from_str(&text).unwrap())
            .collect()
            .await;
        assert_eq!(forwarded, vec![raw]);
    }
}
