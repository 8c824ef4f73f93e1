//! Call Engine Module - Echtzeit-Audio
//!
//! Dieses Modul verwaltet:
//! - Audio Capture (Mikrofon) und PCM-Encoding
//! - Lückenlose Wiedergabe empfangener Frames
//! - Lebenszyklus eines Anrufs und dessen Event-Loop

mod audio;
mod engine;
mod pcm;
mod scheduler;
mod session;

pub use audio::{resample_linear, AudioError, AudioHandler, CaptureReader, PlaybackTimeline};
pub use engine::{
    CallEngine, CallEngineError, CallEvent, CallState, CallTarget, DEFAULT_SIMULATED_ANSWER_DELAY,
};
pub use pcm::{
    decode_base64_frame, decode_pcm16, quantize_sample, AudioBuffer, PcmChunk, PcmError,
    CAPTURE_CHUNK_SIZE, CHANNELS, INPUT_MIME_TYPE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
pub use scheduler::{PlaybackScheduler, ScheduledSource, SourceId};
pub use session::{CallPhase, LiveCall, LiveEvent, LiveTransport, MediaDevices, Transition};
