//! Audio Handler - Mikrofon Capture und Playback
//!
//! Verwendet cpal für Cross-Platform Audio I/O.
//! Capture läuft mit 16kHz mono in einen Ring-Buffer, Playback rendert
//! eingeplante 24kHz-Buffer entlang einer Timeline, deren Position
//! gleichzeitig die Output-Clock ist.

use super::pcm::{AudioBuffer, CAPTURE_CHUNK_SIZE, CHANNELS, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use super::scheduler::{ScheduledSource, SourceId};
use super::session::MediaDevices;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Buffer Size für den Capture-Ring-Buffer
const RING_BUFFER_SIZE: usize = CAPTURE_CHUNK_SIZE * 8;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("No audio output device found")]
    NoOutputDevice,

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

// ============================================================================
// PLAYBACK TIMELINE
// ============================================================================

/// Ein eingeplanter Buffer auf der Timeline
#[derive(Debug, Clone)]
struct Voice {
    id: SourceId,
    start_frame: u64,
    samples: Arc<[f32]>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Timeline im 24kHz-Frame-Raum
///
/// `position` wird nur vom Output-Callback vorwärts bewegt.
#[derive(Debug, Default)]
pub struct PlaybackTimeline {
    position: f64,
    voices: Vec<Voice>,
}

impl PlaybackTimeline {
    /// Output-Clock in Sekunden
    pub fn now(&self) -> f64 {
        self.position / OUTPUT_SAMPLE_RATE as f64
    }

    /// Plant einen Buffer ein. Liegt der Start bereits in der
    /// Vergangenheit, beginnt er an der aktuellen Position ungekürzt.
    pub fn add(&mut self, source: &ScheduledSource, buffer: &AudioBuffer) {
        let scheduled = (source.start * OUTPUT_SAMPLE_RATE as f64).round().max(0.0) as u64;
        let start_frame = scheduled.max(self.position as u64);
        self.voices.push(Voice {
            id: source.id,
            start_frame,
            samples: Arc::clone(buffer.samples()),
        });
    }

    pub fn remove(&mut self, id: SourceId) {
        self.voices.retain(|v| v.id != id);
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Rendert interleaved Output und gibt den mittleren Pegel zurück
    ///
    /// `step` ist die Anzahl Timeline-Frames pro Output-Frame
    /// (24kHz / Device-Rate).
    pub fn render(&mut self, data: &mut [f32], channels: usize, step: f64) -> f32 {
        let channels = channels.max(1);
        let frames = data.len() / channels;
        let mut level_sum = 0.0f32;

        for i in 0..frames {
            let frame = self.position as u64;
            let sample: f32 = self
                .voices
                .iter()
                .filter(|v| v.start_frame <= frame && frame < v.end_frame())
                .map(|v| v.samples[(frame - v.start_frame) as usize])
                .sum();

            level_sum += sample.abs();

            // Auf alle Kanäle verteilen
            for c in 0..channels {
                if let Some(s) = data.get_mut(i * channels + c) {
                    *s = sample;
                }
            }

            self.position += step;
        }

        let played = self.position as u64;
        self.voices.retain(|v| v.end_frame() > played);

        if frames > 0 {
            (level_sum / frames as f32).min(1.0)
        } else {
            0.0
        }
    }
}

// ============================================================================
// CAPTURE READER
// ============================================================================

/// Send-fähiger Zugriff auf den Capture-Buffer
#[derive(Clone)]
pub struct CaptureReader {
    buffer: Arc<Mutex<HeapRb<f32>>>,
    closed: Arc<AtomicBool>,
}

impl CaptureReader {
    /// Liest einen vollständigen Chunk (4096 Samples)
    pub fn read_chunk(&self) -> Option<Vec<f32>> {
        let mut buffer = self.buffer.lock();
        if buffer.occupied_len() >= CAPTURE_CHUNK_SIZE {
            let mut chunk = Vec::with_capacity(CAPTURE_CHUNK_SIZE);
            for _ in 0..CAPTURE_CHUNK_SIZE {
                if let Some(sample) = buffer.try_pop() {
                    chunk.push(sample);
                }
            }
            Some(chunk)
        } else {
            None
        }
    }

    /// true sobald der Input-Kontext geschlossen wurde
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ============================================================================
// AUDIO HANDLER
// ============================================================================

/// Handler für Audio Input/Output eines Live-Calls
pub struct AudioHandler {
    input_device: Option<Device>,
    output_device: Option<Device>,
    // Streams werden in Option gehalten und bei close() gedroppt
    input_stream: Option<Stream>,
    output_stream: Option<Stream>,

    /// Ring-Buffer für aufgenommenes Audio (16kHz mono)
    capture_buffer: Arc<Mutex<HeapRb<f32>>>,

    /// Eingeplante Wiedergaben + Output-Clock
    timeline: Arc<Mutex<PlaybackTimeline>>,

    is_muted: Arc<Mutex<bool>>,
    closed: Arc<AtomicBool>,

    /// Audio Level (0.0 - 1.0) für Visualisierung
    input_level: Arc<Mutex<f32>>,
    output_level: Arc<Mutex<f32>>,
}

// AudioHandler ist nicht automatisch Send wegen Stream.
// Die Streams werden nur vom Call-Event-Loop angefasst, der den Handler besitzt.
unsafe impl Send for AudioHandler {}

impl AudioHandler {
    /// Erwirbt Input- und Output-Device
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();

        let input_device = host.default_input_device();
        let output_device = host.default_output_device();

        if input_device.is_none() {
            tracing::warn!("No audio input device found");
            return Err(AudioError::NoInputDevice);
        }
        if output_device.is_none() {
            tracing::warn!("No audio output device found");
            return Err(AudioError::NoOutputDevice);
        }

        tracing::info!(
            "AudioHandler initialized: capture {}Hz, playback {}Hz, {} channel(s)",
            INPUT_SAMPLE_RATE,
            OUTPUT_SAMPLE_RATE,
            CHANNELS
        );

        Ok(Self {
            input_device,
            output_device,
            input_stream: None,
            output_stream: None,
            capture_buffer: Arc::new(Mutex::new(HeapRb::new(RING_BUFFER_SIZE))),
            timeline: Arc::new(Mutex::new(PlaybackTimeline::default())),
            is_muted: Arc::new(Mutex::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            input_level: Arc::new(Mutex::new(0.0)),
            output_level: Arc::new(Mutex::new(0.0)),
        })
    }

    /// Öffnet den Input-Stream (Mikrofon)
    fn open_input_stream(&mut self) -> Result<(), AudioError> {
        if self.input_stream.is_some() || self.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        let device = self
            .input_device
            .as_ref()
            .ok_or(AudioError::NoInputDevice)?;

        let config = Self::find_best_input_config(device)?;

        tracing::info!(
            "Starting audio capture: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let capture_buffer = Arc::clone(&self.capture_buffer);
        let is_muted = Arc::clone(&self.is_muted);
        let input_level = Arc::clone(&self.input_level);
        let target_sample_rate = INPUT_SAMPLE_RATE;
        let source_sample_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Downmix auf mono
                    let mono: Vec<f32> = data
                        .chunks(channels.max(1))
                        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                        .collect();

                    if mono.is_empty() {
                        return;
                    }

                    // Audio Level berechnen (RMS)
                    let rms: f32 =
                        (mono.iter().map(|s| s * s).sum::<f32>() / mono.len() as f32).sqrt();
                    *input_level.lock() = rms.min(1.0);

                    if *is_muted.lock() {
                        return;
                    }

                    let samples = resample_linear(&mono, source_sample_rate, target_sample_rate);

                    let mut buffer = capture_buffer.lock();
                    for sample in samples {
                        let _ = buffer.try_push(sample);
                    }
                },
                |err| {
                    tracing::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        self.input_stream = Some(stream);
        Ok(())
    }

    /// Startet Audio Playback (Lautsprecher)
    pub fn start_playback(&mut self) -> Result<(), AudioError> {
        if self.output_stream.is_some() || self.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        let device = self
            .output_device
            .as_ref()
            .ok_or(AudioError::NoOutputDevice)?;

        let config = Self::find_best_output_config(device)?;

        tracing::info!(
            "Starting audio playback: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let timeline = Arc::clone(&self.timeline);
        let output_level = Arc::clone(&self.output_level);
        let step = OUTPUT_SAMPLE_RATE as f64 / config.sample_rate.0 as f64;
        let channels = config.channels as usize;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let level = timeline.lock().render(data, channels, step);
                    *output_level.lock() = level;
                },
                |err| {
                    tracing::error!("Audio playback error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        self.output_stream = Some(stream);
        Ok(())
    }

    /// Reader für den Capture-Pump-Task
    pub fn capture_reader(&self) -> CaptureReader {
        CaptureReader {
            buffer: Arc::clone(&self.capture_buffer),
            closed: Arc::clone(&self.closed),
        }
    }

    /// Setzt den Mute-Status
    pub fn set_muted(&self, muted: bool) {
        *self.is_muted.lock() = muted;
        tracing::debug!("Audio muted: {}", muted);
    }

    /// Geteilter Mute-Status (für den CallEngine)
    pub fn mute_handle(&self) -> Arc<Mutex<bool>> {
        Arc::clone(&self.is_muted)
    }

    /// Geteilte Audio-Levels (input, output)
    pub fn level_handles(&self) -> (Arc<Mutex<f32>>, Arc<Mutex<f32>>) {
        (Arc::clone(&self.input_level), Arc::clone(&self.output_level))
    }

    /// Findet die beste Input-Konfiguration
    fn find_best_input_config(device: &Device) -> Result<StreamConfig, AudioError> {
        let configs = device
            .supported_input_configs()
            .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

        select_best_config(configs.collect(), INPUT_SAMPLE_RATE)
    }

    /// Findet die beste Output-Konfiguration
    fn find_best_output_config(device: &Device) -> Result<StreamConfig, AudioError> {
        let configs = device
            .supported_output_configs()
            .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

        select_best_config(configs.collect(), OUTPUT_SAMPLE_RATE)
    }
}

impl MediaDevices for AudioHandler {
    fn output_time(&self) -> f64 {
        self.timeline.lock().now()
    }

    fn start_capture(&mut self) -> Result<(), AudioError> {
        self.open_input_stream()
    }

    fn play_at(&mut self, source: &ScheduledSource, buffer: AudioBuffer) {
        self.timeline.lock().add(source, &buffer);
    }

    fn stop(&mut self, id: SourceId) {
        self.timeline.lock().remove(id);
    }

    fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.input_stream = None;
        self.output_stream = None;
        self.timeline.lock().clear();
        self.capture_buffer.lock().clear();
        tracing::info!("Audio streams stopped");
    }
}

impl Drop for AudioHandler {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Einfaches Linear-Resampling (mono)
pub fn resample_linear(data: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || data.is_empty() {
        return data.to_vec();
    }

    let ratio = target_rate as f32 / source_rate as f32;
    let new_len = (data.len() as f32 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f32 / ratio;
            let idx = src_idx as usize;
            let frac = src_idx - idx as f32;
            let s1 = data.get(idx).copied().unwrap_or(0.0);
            let s2 = data.get(idx + 1).copied().unwrap_or(s1);
            s1 + (s2 - s1) * frac
        })
        .collect()
}

/// Wählt die beste Konfiguration aus einer Liste
///
/// Nur F32-Konfigurationen kommen in Frage, die Stream-Callbacks
/// arbeiten auf `f32`. Priorität: exakte Ziel-Rate, dann höchste Rate.
fn select_best_config(
    configs: Vec<SupportedStreamConfigRange>,
    target: u32,
) -> Result<StreamConfig, AudioError> {
    let target_rate = cpal::SampleRate(target);

    let f32_configs: Vec<&SupportedStreamConfigRange> = configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    if let Some(config) = f32_configs
        .iter()
        .find(|c| c.min_sample_rate() <= target_rate && c.max_sample_rate() >= target_rate)
    {
        return Ok((*config).clone().with_sample_rate(target_rate).into());
    }

    if let Some(config) = f32_configs.first() {
        return Ok((*config).clone().with_max_sample_rate().into());
    }

    let formats: Vec<String> = configs
        .iter()
        .map(|c| format!("{:?}", c.sample_format()))
        .collect();

    Err(AudioError::UnsupportedConfig(format!(
        "No F32 audio configuration found (device offers: [{}])",
        formats.join(", ")
    )))
}

// ============================================================================
// TESTS
// ============================================================================
