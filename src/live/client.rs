//! WebSocket Client für die Live-Session
//!
//! Verwaltet die Streaming-Verbindung zum Modell:
//! - Verbindungsaufbau und Setup-Nachricht
//! - Fire-and-forget Audio-Upload
//! - Eingehende Nachrichten als `LiveEvent` an den Call-Event-Loop

use super::messages::*;
use crate::call_engine::{LiveEvent, LiveTransport, PcmChunk};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Standard-Endpoint der bidirektionalen Streaming-API
pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Kapazität der ausgehenden Queue
const OUTBOUND_QUEUE: usize = 64;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum LiveError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid live endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("No API key configured")]
    MissingApiKey,

    #[error("Failed to encode message: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// CONFIG
// ============================================================================

/// Parameter einer Live-Session
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub voice_name: String,
    pub system_instruction: Option<String>,
}

impl LiveConfig {
    /// URL inklusive API-Key
    pub fn url(&self) -> Result<Url, LiveError> {
        let key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(LiveError::MissingApiKey)?;
        Ok(Url::parse_with_params(&self.endpoint, &[("key", key)])?)
    }
}

// ============================================================================
// LIVE SESSION
// ============================================================================

/// Ausgehende Frames an den Write-Task
#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

/// Handle einer geöffneten Live-Session
pub struct LiveSession {
    tx: mpsc::Sender<Outbound>,
    /// Meldet Schreibfehler an den Call-Event-Loop
    events: mpsc::Sender<LiveEvent>,
    closed: bool,
    sent_chunks: u64,
}

impl LiveSession {
    /// Öffnet die Verbindung und sendet das Setup
    ///
    /// Der Aufruf kehrt nach dem WebSocket-Handshake zurück. `Opened` wird
    /// erst mit `setupComplete` über `events` gemeldet.
    pub async fn connect(
        config: &LiveConfig,
        events: mpsc::Sender<LiveEvent>,
    ) -> Result<Self, LiveError> {
        let url = config.url()?;

        tracing::info!(
            "Connecting to live endpoint {} (model {})",
            config.endpoint,
            config.model
        );

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);

        // Setup zuerst in die Queue, Audio reiht sich dahinter ein
        let setup = SetupMessage::audio(
            &config.model,
            &config.voice_name,
            config.system_instruction.as_deref(),
        );
        let setup_json = serde_json::to_string(&setup)?;
        tx.send(Outbound::Text(setup_json))
            .await
            .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        let write_events = events.clone();
        let session_events = events.clone();

        // Read-Task starten
        tokio::spawn(async move {
            let mut close_reason = None;

            while let Some(msg_result) = read.next().await {
                let text = match msg_result {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(frame)) => {
                        close_reason = frame.map(|f| f.reason.to_string());
                        tracing::info!("Live session closed by server: {:?}", close_reason);
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Live WebSocket error: {}", e);
                        let _ = events.send(LiveEvent::Error(e.to_string())).await;
                        return;
                    }
                    _ => continue,
                };

                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(server_msg) => {
                        if let Some(event) = Self::map_server_message(server_msg) {
                            if events.send(event).await.is_err() {
                                // Call-Loop beendet
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Ignoring unparseable live message: {}", e);
                    }
                }
            }

            let _ = events.send(LiveEvent::Closed(close_reason)).await;
        });

        // Write-Task starten
        tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                let result = match outbound {
                    Outbound::Text(text) => write.send(Message::Text(text)).await,
                    Outbound::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    tracing::error!("Failed to send live message: {}", e);
                    let _ = write_events
                        .send(LiveEvent::Error(format!("Failed to send live message: {}", e)))
                        .await;
                    break;
                }
            }
            let _ = write.close().await;
        });

        Ok(Self {
            tx,
            events: session_events,
            closed: false,
            sent_chunks: 0,
        })
    }

    /// Übersetzt Server-Nachrichten in Call-Events
    fn map_server_message(msg: ServerMessage) -> Option<LiveEvent> {
        if msg.is_setup_complete() {
            return Some(LiveEvent::Opened);
        }

        if let Some(payload) = msg.audio_payload() {
            return Some(LiveEvent::ServerAudio(payload.to_string()));
        }

        if msg.is_turn_complete() {
            tracing::debug!("Model turn complete");
        }

        // Bereits eingeplantes Audio läuft weiter
        if msg.server_content.as_ref().is_some_and(|c| c.interrupted) {
            tracing::debug!("Model turn interrupted");
        }

        if let Some(go_away) = msg.go_away {
            tracing::warn!("Live session going away (time left: {:?})", go_away.time_left);
        }

        None
    }

    pub fn sent_chunks(&self) -> u64 {
        self.sent_chunks
    }
}

impl LiveTransport for LiveSession {
    fn send_realtime_input(&mut self, chunk: &PcmChunk) {
        if self.closed {
            return;
        }

        let msg = RealtimeInputMessage::media(chunk.mime_type(), chunk.to_base64());
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to encode audio chunk: {}", e);
                return;
            }
        };

        // try_send ist non-blocking; volle Queue verwirft den Chunk
        match self.tx.try_send(Outbound::Text(json)) {
            Ok(()) => self.sent_chunks += 1,
            Err(TrySendError::Full(_)) => tracing::warn!("Dropping audio chunk: queue full"),
            Err(TrySendError::Closed(_)) => {
                // Write-Task beendet, die Session ist tot
                self.closed = true;
                tracing::error!("Live session writer stopped, ending session");
                let _ = self.events.try_send(LiveEvent::Error(
                    "Live session writer stopped".to_string(),
                ));
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.tx.try_send(Outbound::Close);
        tracing::info!("Live session closed ({} chunk(s) sent)", self.sent_chunks);
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("closed", &self.closed)
            .field("sent_chunks", &self.sent_chunks)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: Option<&str>) -> LiveConfig {
        LiveConfig {
            endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
            api_key: api_key.map(str::to_string),
            model: "gemini-2.5-flash-native-audio-preview-12-2025".to_string(),
            voice_name: "Zephyr".to_string(),
            system_instruction: None,
        }
    }

    #[test]
    fn test_url_carries_api_key() {
        let url = config(Some("secret")).url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.query(), Some("key=secret"));
    }

    #[test]
    fn test_url_requires_api_key() {
        assert!(matches!(config(None).url(), Err(LiveError::MissingApiKey)));
        assert!(matches!(config(Some("")).url(), Err(LiveError::MissingApiKey)));
    }

    #[test]
    fn test_map_server_messages() {
        let setup: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(matches!(
            LiveSession::map_server_message(setup),
            Some(LiveEvent::Opened)
        ));

        let audio: ServerMessage = serde_json::from_str(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}}]}}}"#,
        )
        .unwrap();
        match LiveSession::map_server_message(audio) {
            Some(LiveEvent::ServerAudio(data)) => assert_eq!(data, "AAAA"),
            other => panic!("unexpected event: {:?}", other),
        }

        let done: ServerMessage =
            serde_json::from_str(r#"{"serverContent":{"turnComplete":true}}"#).unwrap();
        assert!(LiveSession::map_server_message(done).is_none());
    }

    #[tokio::test]
    async fn test_closed_session_stops_sending() {
        let (tx, mut rx) = mpsc::channel(4);
        let (events, _events_rx) = mpsc::channel(4);
        let mut session = LiveSession {
            tx,
            events,
            closed: false,
            sent_chunks: 0,
        };

        session.send_realtime_input(&PcmChunk::encode(&[0.0; 8]));
        session.close();
        session.close();
        session.send_realtime_input(&PcmChunk::encode(&[0.0; 8]));

        assert_eq!(session.sent_chunks(), 1);
        assert!(matches!(rx.recv().await, Some(Outbound::Text(_))));
        assert!(matches!(rx.recv().await, Some(Outbound::Close)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stopped_writer_ends_session() {
        let (tx, rx) = mpsc::channel(4);
        let (events, mut events_rx) = mpsc::channel(4);
        let mut session = LiveSession {
            tx,
            events,
            closed: false,
            sent_chunks: 0,
        };

        // Write-Task weg, z.B. nach einem Socket-Fehler
        drop(rx);
        session.send_realtime_input(&PcmChunk::encode(&[0.5; 8]));

        assert!(matches!(events_rx.try_recv(), Ok(LiveEvent::Error(_))));
        assert_eq!(session.sent_chunks(), 0);
        assert!(session.closed);

        // Weitere Chunks melden keinen zweiten Fehler
        session.send_realtime_input(&PcmChunk::encode(&[0.5; 8]));
        assert!(events_rx.try_recv().is_err());
    }

    // ------------------------------------------------------------------------
    // Gegen einen lokalen WebSocket-Server
    // ------------------------------------------------------------------------

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};

    const TEST_MODEL: &str = "test-model";

    async fn local_server() -> (TcpListener, LiveConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = LiveConfig {
            endpoint: format!("ws://{}", addr),
            api_key: Some("secret".to_string()),
            model: TEST_MODEL.to_string(),
            voice_name: "Zephyr".to_string(),
            system_instruction: Some("Be brief.".to_string()),
        };
        (listener, config)
    }

    async fn recv(events: &mut mpsc::Receiver<LiveEvent>) -> LiveEvent {
        tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .expect("no live event in time")
            .expect("event channel closed")
    }

    fn frame_json(msg: Message) -> serde_json::Value {
        match msg {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_against_local_server() {
        let (listener, config) = local_server().await;
        let expected_audio = PcmChunk::encode(&[1.0, -1.0]).to_base64();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            // Erstes Frame ist das Setup
            let setup = frame_json(ws.next().await.unwrap().unwrap());
            assert_eq!(setup["setup"]["model"], format!("models/{}", TEST_MODEL));
            assert_eq!(
                setup["setup"]["generationConfig"]["responseModalities"],
                serde_json::json!(["AUDIO"])
            );

            // setupComplete als Binary-Frame
            ws.send(Message::Binary(br#"{"setupComplete":{}}"#.to_vec()))
                .await
                .unwrap();

            let input = frame_json(ws.next().await.unwrap().unwrap());
            let chunk = &input["realtimeInput"]["mediaChunks"][0];
            assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
            assert_eq!(chunk["data"], expected_audio);

            ws.send(Message::Text(
                r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}}]}}}"#
                    .to_string(),
            ))
            .await
            .unwrap();

            ws.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            })))
            .await
            .unwrap();

            // Verbindung halten bis der Client `Closed` gesehen hat
            let _ = done_rx.await;
        });

        let (events_tx, mut events) = mpsc::channel(16);
        let mut session = LiveSession::connect(&config, events_tx).await.unwrap();

        assert!(matches!(recv(&mut events).await, LiveEvent::Opened));
        session.send_realtime_input(&PcmChunk::encode(&[1.0, -1.0]));
        assert_eq!(session.sent_chunks(), 1);

        match recv(&mut events).await {
            LiveEvent::ServerAudio(data) => assert_eq!(data, "AAAA"),
            other => panic!("unexpected event: {:?}", other),
        }
        match recv(&mut events).await {
            LiveEvent::Closed(reason) => assert_eq!(reason.as_deref(), Some("bye")),
            other => panic!("unexpected event: {:?}", other),
        }

        done_tx.send(()).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_socket_reports_error() {
        let (listener, config) = local_server().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _setup = ws.next().await.unwrap().unwrap();
            // Verbindung ohne Close-Handshake kappen
            drop(ws);
        });

        let (events_tx, mut events) = mpsc::channel(16);
        let _session = LiveSession::connect(&config, events_tx).await.unwrap();

        server.await.unwrap();
        assert!(matches!(recv(&mut events).await, LiveEvent::Error(_)));
    }
}
