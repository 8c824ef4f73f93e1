//! Call Engine
//!
//! Verwaltet genau einen Anruf zur Zeit und koordiniert
//! Audio Capture/Playback mit der Live-Session.
//!
//! Pro Anruf läuft ein einzelner Event-Loop-Task, der den `LiveCall`
//! besitzt. Capture-Chunks, Server-Nachrichten, Auflegen und Reap-Ticks
//! werden dort nacheinander verarbeitet.

use super::audio::{AudioError, AudioHandler, CaptureReader};
use super::session::{LiveCall, LiveEvent, Transition};
use crate::chat::CallRecord;
use crate::live::{LiveConfig, LiveError, LiveSession};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Verzögerung bis ein simulierter Anruf "abhebt"
pub const DEFAULT_SIMULATED_ANSWER_DELAY: Duration = Duration::from_millis(1500);

/// Intervall zum Entfernen beendeter Wiedergaben
const REAP_INTERVAL: Duration = Duration::from_millis(100);

/// Intervall des Capture-Pumps (ein Chunk sind 256ms Audio)
const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Nach `Ended` zurück auf `Idle`
const ENDED_RESET_DELAY: Duration = Duration::from_millis(500);

const EVENT_QUEUE: usize = 256;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum CallEngineError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Live session error: {0}")]
    Live(#[from] LiveError),

    #[error("No active call")]
    NoActiveCall,

    #[error("Already in a call")]
    AlreadyInCall,
}

// ============================================================================
// CALL STATE
// ============================================================================

/// Aktueller Status eines Anrufs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    /// Kein aktiver Anruf
    Idle,
    /// Geräte und Remote-Session werden aufgebaut
    Connecting { contact_id: String },
    /// Anruf aktiv
    Connected { contact_id: String },
    /// Anruf beendet
    Ended,
}

impl CallState {
    pub fn contact_id(&self) -> Option<&str> {
        match self {
            CallState::Connecting { contact_id } | CallState::Connected { contact_id } => {
                Some(contact_id.as_str())
            }
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.contact_id().is_some()
    }
}

/// Events die vom CallEngine ausgelöst werden
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(CallState),
    /// Genau einmal pro Anruf
    Ended(CallRecord),
    Error(String),
}

/// Gegenstelle eines Anrufs
#[derive(Debug, Clone)]
pub enum CallTarget {
    /// Echtzeit-Audio mit dem Modell
    Live(LiveConfig),
    /// Kontakt ohne Transport, hebt nach `answer_after` ab
    Simulated { answer_after: Duration },
}

impl CallTarget {
    pub fn simulated() -> Self {
        CallTarget::Simulated {
            answer_after: DEFAULT_SIMULATED_ANSWER_DELAY,
        }
    }
}

#[derive(Debug)]
enum CallCommand {
    HangUp,
}

/// Geteilte Handles des AudioHandlers
#[derive(Clone)]
struct AudioControls {
    is_muted: Arc<Mutex<bool>>,
    input_level: Arc<Mutex<f32>>,
    output_level: Arc<Mutex<f32>>,
}

/// Zwischen Engine und Event-Loop geteilter Zustand
#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<CallState>>,
    event_tx: broadcast::Sender<CallEvent>,
    commands: Arc<Mutex<Option<mpsc::Sender<CallCommand>>>>,
    audio: Arc<Mutex<Option<AudioControls>>>,
    is_muted: Arc<Mutex<bool>>,
}

impl Shared {
    /// Aktualisiert den State und sendet Event
    fn set_state(&self, new_state: CallState) {
        *self.state.lock() = new_state.clone();
        let _ = self.event_tx.send(CallEvent::StateChanged(new_state));
    }

    fn emit_error(&self, message: String) {
        tracing::error!("Call error: {}", message);
        let _ = self.event_tx.send(CallEvent::Error(message));
    }

    /// Abschluss eines Anrufs, einmal pro Event-Loop
    fn finish(&self, record: Option<CallRecord>) {
        self.commands.lock().take();
        self.audio.lock().take();

        self.set_state(CallState::Ended);
        if let Some(record) = record {
            let _ = self.event_tx.send(CallEvent::Ended(record));
        }

        // Kurz warten und dann auf Idle setzen
        let state = Arc::clone(&self.state);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ENDED_RESET_DELAY).await;
            let mut current = state.lock();
            if *current == CallState::Ended {
                *current = CallState::Idle;
                let _ = event_tx.send(CallEvent::StateChanged(CallState::Idle));
            }
        });
    }
}

// ============================================================================
// CALL ENGINE
// ============================================================================

pub struct CallEngine {
    shared: Shared,
}

impl CallEngine {
    /// Erstellt eine neue CallEngine
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            shared: Shared {
                state: Arc::new(Mutex::new(CallState::Idle)),
                event_tx,
                commands: Arc::new(Mutex::new(None)),
                audio: Arc::new(Mutex::new(None)),
                is_muted: Arc::new(Mutex::new(false)),
            },
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Gibt den aktuellen Call-Status zurück
    pub fn state(&self) -> CallState {
        self.shared.state.lock().clone()
    }

    /// Startet einen ausgehenden Anruf
    ///
    /// Kehrt sofort im Zustand `Connecting` zurück. Geräte und Session
    /// werden im Event-Loop des Anrufs aufgebaut.
    pub fn start_call(&self, contact_id: &str, target: CallTarget) -> Result<(), CallEngineError> {
        // Fehlkonfiguration vor dem Verbindungsaufbau melden
        if let CallTarget::Live(config) = &target {
            config.url()?;
        }

        let (command_tx, command_rx) = mpsc::channel(4);
        {
            let mut state = self.shared.state.lock();
            if state.is_active() {
                return Err(CallEngineError::AlreadyInCall);
            }
            *state = CallState::Connecting {
                contact_id: contact_id.to_string(),
            };
        }
        *self.shared.commands.lock() = Some(command_tx);
        *self.shared.is_muted.lock() = false;

        let _ = self
            .shared
            .event_tx
            .send(CallEvent::StateChanged(self.state()));

        tracing::info!("Starting call to {}", contact_id);

        let shared = self.shared.clone();
        let contact_id = contact_id.to_string();
        tokio::spawn(async move {
            run_call(shared, contact_id, target, command_rx).await;
        });

        Ok(())
    }

    /// Beendet den aktuellen Anruf
    ///
    /// Mehrfache oder verspätete Aufrufe sind No-ops.
    pub fn hang_up(&self) -> Result<(), CallEngineError> {
        let sender = self.shared.commands.lock().take();
        match sender {
            Some(tx) => {
                tracing::info!("Hanging up");
                let _ = tx.try_send(CallCommand::HangUp);
                Ok(())
            }
            None => Err(CallEngineError::NoActiveCall),
        }
    }

    /// Setzt Mute-Status
    pub fn set_muted(&self, muted: bool) {
        *self.shared.is_muted.lock() = muted;
        if let Some(audio) = self.shared.audio.lock().as_ref() {
            *audio.is_muted.lock() = muted;
        }
        tracing::debug!("Call muted: {}", muted);
    }

    /// Gibt Mute-Status zurück
    pub fn is_muted(&self) -> bool {
        *self.shared.is_muted.lock()
    }

    /// Gibt Audio-Levels zurück (input, output)
    pub fn audio_levels(&self) -> (f32, f32) {
        self.shared
            .audio
            .lock()
            .as_ref()
            .map(|a| (*a.input_level.lock(), *a.output_level.lock()))
            .unwrap_or((0.0, 0.0))
    }
}

impl Default for CallEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallEngine")
            .field("state", &self.state())
            .field("is_muted", &self.is_muted())
            .finish()
    }
}

// ============================================================================
// EVENT LOOP
// ============================================================================

/// Event-Loop eines einzelnen Anrufs
async fn run_call(
    shared: Shared,
    contact_id: String,
    target: CallTarget,
    mut commands: mpsc::Receiver<CallCommand>,
) {
    let (events_tx, mut events) = mpsc::channel::<LiveEvent>(EVENT_QUEUE);

    let mut call = LiveCall::new(contact_id.clone());
    call.begin();

    let mut capture_reader: Option<CaptureReader> = None;

    match target {
        CallTarget::Simulated { answer_after } => {
            let opener = events_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(answer_after).await;
                let _ = opener.send(LiveEvent::Opened).await;
            });
        }

        CallTarget::Live(config) => {
            // Geräte vor dem Handshake erwerben
            match acquire_audio(&shared) {
                Ok(audio) => {
                    capture_reader = Some(audio.capture_reader());
                    call.attach_media(Box::new(audio));
                }
                Err(e) => {
                    shared.emit_error(e.to_string());
                    shared.finish(call.hang_up());
                    return;
                }
            }

            // Auflegen bricht auch den Verbindungsaufbau ab
            tokio::select! {
                result = LiveSession::connect(&config, events_tx.clone()) => match result {
                    Ok(session) => call.attach_transport(Box::new(session)),
                    Err(e) => {
                        shared.emit_error(e.to_string());
                        shared.finish(call.hang_up());
                        return;
                    }
                },
                _ = commands.recv() => {
                    tracing::info!("Call to {} cancelled while connecting", contact_id);
                    shared.finish(call.hang_up());
                    return;
                }
            }
        }
    }

    let mut reap = tokio::time::interval(REAP_INTERVAL);

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                if let LiveEvent::Error(reason) = &event {
                    shared.emit_error(reason.clone());
                }

                match call.handle(event) {
                    Transition::Opened => {
                        shared.set_state(CallState::Connected {
                            contact_id: contact_id.clone(),
                        });
                        if let Some(reader) = capture_reader.take() {
                            spawn_capture_pump(reader, events_tx.clone());
                        }
                    }
                    Transition::Closed(record) => {
                        shared.finish(Some(record));
                        return;
                    }
                    Transition::None => {}
                }
            }

            // HangUp oder Engine gedroppt
            _ = commands.recv() => {
                shared.finish(call.hang_up());
                return;
            }

            _ = reap.tick() => {
                let reaped = call.reap_finished();
                if reaped > 0 {
                    tracing::trace!("Reaped {} finished source(s)", reaped);
                }
            }
        }
    }
}

/// Öffnet Audio-Geräte und startet den Playback-Kontext
fn acquire_audio(shared: &Shared) -> Result<AudioHandler, AudioError> {
    let mut audio = AudioHandler::new()?;
    audio.start_playback()?;
    audio.set_muted(*shared.is_muted.lock());

    let (input_level, output_level) = audio.level_handles();
    *shared.audio.lock() = Some(AudioControls {
        is_muted: audio.mute_handle(),
        input_level,
        output_level,
    });

    Ok(audio)
}

/// Leitet fertige Capture-Chunks in den Event-Loop
fn spawn_capture_pump(reader: CaptureReader, events: mpsc::Sender<LiveEvent>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CAPTURE_POLL_INTERVAL);
        loop {
            interval.tick().await;
            if reader.is_closed() {
                break;
            }
            while let Some(chunk) = reader.read_chunk() {
                if events.send(LiveEvent::Captured(chunk)).await.is_err() {
                    return;
                }
            }
        }
        tracing::debug!("Capture pump stopped");
    });
}

// ============================================================================
// TESTS
// ============================================================================
