//! Live Call Session
//!
//! Zustandsmaschine eines einzelnen Anrufs:
//! `Idle → Connecting → Open → Closed`, Fehler führen direkt zu `Closed`.
//!
//! Die Session besitzt Playback-Cursor, laufende Wiedergaben, Transport und
//! Audio-Geräte. Sie wird ausschließlich vom Event-Loop des CallEngine
//! angesprochen und lässt sich mit synthetischen Events testen.

use super::audio::AudioError;
use super::pcm::{decode_base64_frame, AudioBuffer, PcmChunk};
use super::scheduler::{PlaybackScheduler, ScheduledSource, SourceId};
use crate::chat::{CallKind, CallRecord};
use chrono::{DateTime, Utc};
use uuid::Uuid;

// ============================================================================
// COLLABORATORS
// ============================================================================

/// Remote-Session (z.B. Live-WebSocket)
pub trait LiveTransport: Send {
    /// Fire-and-forget Upload eines Frames
    fn send_realtime_input(&mut self, chunk: &PcmChunk);

    /// Schließt die Session. Mehrfache Aufrufe sind No-ops.
    fn close(&mut self);
}

/// Capture- und Playback-Kontexte
pub trait MediaDevices: Send {
    /// Aktuelle Zeit der Output-Clock in Sekunden
    fn output_time(&self) -> f64;

    /// Startet die Aufnahme, sobald die Session offen ist
    fn start_capture(&mut self) -> Result<(), AudioError>;

    /// Spielt `buffer` ab `source.start` auf der Output-Clock
    fn play_at(&mut self, source: &ScheduledSource, buffer: AudioBuffer);

    /// Stoppt eine laufende Wiedergabe
    fn stop(&mut self, id: SourceId);

    /// Schließt Capture und Playback. Mehrfache Aufrufe sind No-ops.
    fn close(&mut self);
}

// ============================================================================
// STATES & EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Alles was den Event-Loop eines Anrufs erreicht
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// Remote-Session ist bereit
    Opened,
    /// base64-kodiertes 24kHz PCM vom Modell
    ServerAudio(String),
    /// Fertiger Capture-Chunk (16kHz f32)
    Captured(Vec<f32>),
    /// Fehler der Remote-Session oder beim Verbindungsaufbau
    Error(String),
    /// Remote-Session wurde geschlossen
    Closed(Option<String>),
}

/// Ergebnis eines verarbeiteten Events
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    None,
    /// Capture-Wiring darf starten
    Opened,
    /// Anruf beendet, genau ein Record
    Closed(CallRecord),
}

// ============================================================================
// LIVE CALL
// ============================================================================

/// Session-Kontext eines Anrufs
pub struct LiveCall {
    contact_id: String,
    kind: CallKind,
    phase: CallPhase,
    started_at: Option<DateTime<Utc>>,
    scheduler: PlaybackScheduler,
    transport: Option<Box<dyn LiveTransport>>,
    media: Option<Box<dyn MediaDevices>>,
    dropped_frames: u64,
}

impl LiveCall {
    pub fn new(contact_id: impl Into<String>) -> Self {
        Self {
            contact_id: contact_id.into(),
            kind: CallKind::Outgoing,
            phase: CallPhase::Idle,
            started_at: None,
            scheduler: PlaybackScheduler::new(),
            transport: None,
            media: None,
            dropped_frames: 0,
        }
    }

    pub fn contact_id(&self) -> &str {
        &self.contact_id
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase == CallPhase::Closed
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// `Idle → Connecting`, startet den Zeitzähler
    pub fn begin(&mut self) {
        self.begin_at(Utc::now());
    }

    pub fn begin_at(&mut self, now: DateTime<Utc>) {
        if self.phase != CallPhase::Idle {
            return;
        }
        self.phase = CallPhase::Connecting;
        self.started_at = Some(now);
        tracing::info!("Call to {} connecting", self.contact_id);
    }

    /// Übernimmt geöffnete Audio-Kontexte
    ///
    /// Nach dem Ende eines Anrufs werden sie sofort wieder geschlossen.
    pub fn attach_media(&mut self, mut media: Box<dyn MediaDevices>) {
        if self.is_closed() {
            media.close();
            return;
        }
        self.media = Some(media);
    }

    /// Übernimmt die Remote-Session
    pub fn attach_transport(&mut self, mut transport: Box<dyn LiveTransport>) {
        if self.is_closed() {
            transport.close();
            return;
        }
        self.transport = Some(transport);
    }

    /// Verarbeitet ein Event
    pub fn handle(&mut self, event: LiveEvent) -> Transition {
        self.handle_at(event, Utc::now())
    }

    pub fn handle_at(&mut self, event: LiveEvent, now: DateTime<Utc>) -> Transition {
        if self.is_closed() {
            return Transition::None;
        }

        match event {
            LiveEvent::Opened => {
                if self.phase != CallPhase::Connecting {
                    return Transition::None;
                }
                if let Some(media) = self.media.as_mut() {
                    if let Err(e) = media.start_capture() {
                        tracing::error!("Failed to start capture: {}", e);
                        return self.close_at(now);
                    }
                }
                self.phase = CallPhase::Open;
                tracing::info!("Call to {} open", self.contact_id);
                Transition::Opened
            }

            LiveEvent::ServerAudio(payload) => {
                self.play_frame(&payload);
                Transition::None
            }

            LiveEvent::Captured(samples) => {
                if self.phase == CallPhase::Open {
                    if let Some(transport) = self.transport.as_mut() {
                        transport.send_realtime_input(&PcmChunk::encode(&samples));
                    }
                }
                Transition::None
            }

            LiveEvent::Error(reason) => {
                tracing::error!("Live session error: {}", reason);
                self.close_at(now)
            }

            LiveEvent::Closed(reason) => {
                tracing::info!("Live session closed by remote (reason: {:?})", reason);
                self.close_at(now)
            }
        }
    }

    /// Dekodiert und plant einen Frame ein
    fn play_frame(&mut self, payload: &str) {
        let now = match self.media.as_ref() {
            Some(media) => media.output_time(),
            None => return,
        };

        let buffer = match decode_base64_frame(payload) {
            Ok(buffer) if !buffer.is_empty() => buffer,
            Ok(_) => return,
            Err(e) => {
                self.dropped_frames += 1;
                tracing::debug!("Dropping undecodable audio frame: {}", e);
                return;
            }
        };

        let source = self.scheduler.schedule(&buffer, now);
        if let Some(media) = self.media.as_mut() {
            media.play_at(&source, buffer);
        }
    }

    /// Entfernt natürlich beendete Wiedergaben
    pub fn reap_finished(&mut self) -> usize {
        match self.media.as_ref() {
            Some(media) => {
                let now = media.output_time();
                self.scheduler.reap(now).len()
            }
            None => 0,
        }
    }

    /// Auflegen. Nur der erste Aufruf erzeugt einen Record.
    pub fn hang_up(&mut self) -> Option<CallRecord> {
        self.hang_up_at(Utc::now())
    }

    pub fn hang_up_at(&mut self, now: DateTime<Utc>) -> Option<CallRecord> {
        match self.close_at(now) {
            Transition::Closed(record) => Some(record),
            _ => None,
        }
    }

    /// Gemeinsamer Cleanup-Pfad für Auflegen, Fehler und Remote-Close
    fn close_at(&mut self, now: DateTime<Utc>) -> Transition {
        if self.is_closed() {
            return Transition::None;
        }

        let was_open = self.phase == CallPhase::Open;
        self.phase = CallPhase::Closed;

        if let Some(transport) = self.transport.as_mut() {
            transport.close();
        }

        let stopped = self.scheduler.stop_all();
        if let Some(media) = self.media.as_mut() {
            for source in &stopped {
                media.stop(source.id);
            }
            media.close();
        }

        let started_at = match self.started_at {
            Some(t) => t,
            // Nie gestartet: kein Anruf, kein Record
            None => return Transition::None,
        };

        let duration = if was_open {
            let elapsed_ms = (now - started_at).num_milliseconds().max(0);
            Some((elapsed_ms / 1000) as u64)
        } else {
            None
        };

        let record = CallRecord {
            id: Uuid::new_v4().to_string(),
            user_id: self.contact_id.clone(),
            kind: self.kind,
            timestamp: started_at.timestamp_millis(),
            duration,
        };

        tracing::info!(
            "Call to {} ended (duration: {:?}, stopped {} source(s))",
            self.contact_id,
            duration,
            stopped.len()
        );

        Transition::Closed(record)
    }
}

impl std::fmt::Debug for LiveCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveCall")
            .field("contact_id", &self.contact_id)
            .field("phase", &self.phase)
            .field("in_flight", &self.scheduler.in_flight_len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::Duration;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeMediaState {
        now: f64,
        capturing: bool,
        fail_capture: bool,
        playing: Vec<ScheduledSource>,
        stopped: Vec<SourceId>,
        close_calls: usize,
    }

    #[derive(Clone, Default)]
    struct FakeMedia(Arc<Mutex<FakeMediaState>>);

    impl MediaDevices for FakeMedia {
        fn output_time(&self) -> f64 {
            self.0.lock().now
        }

        fn start_capture(&mut self) -> Result<(), AudioError> {
            let mut state = self.0.lock();
            if state.fail_capture {
                return Err(AudioError::NoInputDevice);
            }
            state.capturing = true;
            Ok(())
        }

        fn play_at(&mut self, source: &ScheduledSource, _buffer: AudioBuffer) {
            self.0.lock().playing.push(*source);
        }

        fn stop(&mut self, id: SourceId) {
            self.0.lock().stopped.push(id);
        }

        fn close(&mut self) {
            self.0.lock().close_calls += 1;
        }
    }

    #[derive(Default)]
    struct FakeTransportState {
        sent: Vec<PcmChunk>,
        close_calls: usize,
    }

    #[derive(Clone, Default)]
    struct FakeTransport(Arc<Mutex<FakeTransportState>>);

    impl LiveTransport for FakeTransport {
        fn send_realtime_input(&mut self, chunk: &PcmChunk) {
            self.0.lock().sent.push(chunk.clone());
        }

        fn close(&mut self) {
            self.0.lock().close_calls += 1;
        }
    }

    fn frame(secs: f64) -> String {
        let samples = (secs * 24000.0).round() as usize;
        BASE64.encode(vec![0u8; samples * 2])
    }

    fn open_call(start: DateTime<Utc>) -> (LiveCall, FakeMedia, FakeTransport) {
        let media = FakeMedia::default();
        let transport = FakeTransport::default();
        let mut call = LiveCall::new("ai-assistant");
        call.begin_at(start);
        call.attach_media(Box::new(media.clone()));
        call.attach_transport(Box::new(transport.clone()));
        assert_eq!(call.handle_at(LiveEvent::Opened, start), Transition::Opened);
        (call, media, transport)
    }

    #[test]
    fn test_capture_only_sent_when_open() {
        let transport = FakeTransport::default();
        let mut call = LiveCall::new("ai-assistant");
        call.begin();
        call.attach_transport(Box::new(transport.clone()));

        call.handle(LiveEvent::Captured(vec![0.5; 4096]));
        assert!(transport.0.lock().sent.is_empty());

        call.handle(LiveEvent::Opened);
        call.handle(LiveEvent::Captured(vec![1.0; 4096]));
        call.handle(LiveEvent::Captured(vec![-1.0; 4096]));

        let sent = &transport.0.lock().sent;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].samples[0], 32767);
        assert_eq!(sent[1].samples[0], -32768);
    }

    #[test]
    fn test_inbound_frames_scheduled_back_to_back() {
        let start = Utc::now();
        let (mut call, media, _) = open_call(start);
        media.0.lock().now = 2.0;

        for secs in [0.5, 0.3, 0.7] {
            call.handle_at(LiveEvent::ServerAudio(frame(secs)), start);
        }

        let playing = media.0.lock().playing.clone();
        assert_eq!(playing.len(), 3);
        assert!((playing[0].start - 2.0).abs() < 1e-9);
        assert!((playing[1].start - 2.5).abs() < 1e-9);
        assert!((playing[2].start - 2.8).abs() < 1e-9);
        assert_eq!(call.scheduler().in_flight_len(), 3);

        media.0.lock().now = 2.0 + 0.6;
        assert_eq!(call.reap_finished(), 1);
        media.0.lock().now = 2.0 + 1.5 + 1e-6;
        assert_eq!(call.reap_finished(), 2);
        assert_eq!(call.scheduler().in_flight_len(), 0);
    }

    #[test]
    fn test_undecodable_frame_is_dropped() {
        let start = Utc::now();
        let (mut call, media, _) = open_call(start);

        call.handle_at(LiveEvent::ServerAudio("%%%".to_string()), start);
        call.handle_at(LiveEvent::ServerAudio(BASE64.encode([1u8, 2, 3])), start);

        assert_eq!(call.dropped_frames(), 2);
        assert!(media.0.lock().playing.is_empty());
        assert_eq!(call.scheduler().next_start(), 0.0);
    }

    #[test]
    fn test_double_hang_up_yields_one_record() {
        let start = Utc::now();
        let (mut call, media, transport) = open_call(start);
        call.handle_at(LiveEvent::ServerAudio(frame(0.5)), start);

        let first = call.hang_up_at(start + Duration::milliseconds(4500));
        let second = call.hang_up_at(start + Duration::milliseconds(9000));

        let record = first.expect("first hang-up must produce a record");
        assert_eq!(record.duration, Some(4));
        assert_eq!(record.user_id, "ai-assistant");
        assert_eq!(record.kind, CallKind::Outgoing);
        assert_eq!(record.timestamp, start.timestamp_millis());
        assert!(second.is_none());

        assert_eq!(transport.0.lock().close_calls, 1);
        assert_eq!(media.0.lock().close_calls, 1);
        assert_eq!(media.0.lock().stopped.len(), 1);
        assert_eq!(call.scheduler().in_flight_len(), 0);
    }

    #[test]
    fn test_hang_up_while_connecting_has_no_duration() {
        let start = Utc::now();
        let mut call = LiveCall::new("user-2");
        call.begin_at(start);

        let record = call
            .hang_up_at(start + Duration::seconds(3))
            .expect("record");
        assert_eq!(record.duration, None);
        assert!(call.is_closed());
    }

    #[test]
    fn test_remote_error_uses_cleanup_path() {
        let start = Utc::now();
        let (mut call, media, transport) = open_call(start);

        let transition = call.handle_at(
            LiveEvent::Error("socket reset".to_string()),
            start + Duration::milliseconds(2999),
        );
        match transition {
            Transition::Closed(record) => assert_eq!(record.duration, Some(2)),
            other => panic!("unexpected transition: {:?}", other),
        }

        // Späte Events und Auflegen nach dem Fehler sind No-ops
        assert_eq!(call.handle(LiveEvent::Closed(None)), Transition::None);
        assert!(call.hang_up().is_none());
        assert_eq!(transport.0.lock().close_calls, 1);
        assert_eq!(media.0.lock().close_calls, 1);
    }

    #[test]
    fn test_capture_starts_only_on_open() {
        let media = FakeMedia::default();
        let mut call = LiveCall::new("ai-assistant");
        call.begin();
        call.attach_media(Box::new(media.clone()));
        assert!(!media.0.lock().capturing);

        call.handle(LiveEvent::Opened);
        assert!(media.0.lock().capturing);
        assert_eq!(call.phase(), CallPhase::Open);
    }

    #[test]
    fn test_capture_failure_ends_call_without_duration() {
        let media = FakeMedia::default();
        media.0.lock().fail_capture = true;
        let mut call = LiveCall::new("ai-assistant");
        call.begin();
        call.attach_media(Box::new(media.clone()));

        match call.handle(LiveEvent::Opened) {
            Transition::Closed(record) => assert_eq!(record.duration, None),
            other => panic!("unexpected transition: {:?}", other),
        }
        assert_eq!(media.0.lock().close_calls, 1);
    }

    #[test]
    fn test_resources_attached_after_close_are_released() {
        let mut call = LiveCall::new("ai-assistant");
        call.begin();
        call.hang_up();

        let media = FakeMedia::default();
        let transport = FakeTransport::default();
        call.attach_media(Box::new(media.clone()));
        call.attach_transport(Box::new(transport.clone()));

        assert_eq!(media.0.lock().close_calls, 1);
        assert_eq!(transport.0.lock().close_calls, 1);
    }
}
