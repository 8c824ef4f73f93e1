//! PCM Wire-Format
//!
//! Konvertiert Mikrofon-Samples (f32) in 16-bit Linear-PCM für den
//! Live-Upload und dekodiert eingehende base64-PCM-Payloads wieder in
//! abspielbare Buffer.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate für Mikrofon-Capture (Upload an das Modell)
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample Rate der Audio-Antworten des Modells
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Channels (Mono für Voice)
pub const CHANNELS: u16 = 1;

/// Chunk-Größe in Samples für den Upload (256ms @ 16kHz)
pub const CAPTURE_CHUNK_SIZE: usize = 4096;

/// MIME-Type der ausgehenden Frames
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum PcmError {
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM payload has odd length: {0} bytes")]
    OddLength(usize),
}

// ============================================================================
// ENCODING (Capture → Wire)
// ============================================================================

/// Quantisiert ein f32-Sample auf i16
///
/// Werte außerhalb von [-1, 1] werden geclampt, nicht gewrappt.
pub fn quantize_sample(sample: f32) -> i16 {
    let s = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Ein ausgehender Frame: 16-bit PCM, 16kHz, mono
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    pub samples: Vec<i16>,
}

impl PcmChunk {
    /// Kodiert einen Capture-Chunk
    pub fn encode(samples: &[f32]) -> Self {
        Self {
            samples: samples.iter().map(|s| quantize_sample(*s)).collect(),
        }
    }

    /// Little-Endian Bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    /// Base64-Payload für `realtimeInput`
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    pub fn mime_type(&self) -> &'static str {
        INPUT_MIME_TYPE
    }
}

// ============================================================================
// DECODING (Wire → Playback)
// ============================================================================

/// Dekodierter, abspielbarer Buffer
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Stille mit gegebener Dauer (für Tests und Simulation)
    pub fn silence(duration_secs: f64, sample_rate: u32) -> Self {
        let len = (duration_secs * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn samples(&self) -> &Arc<[f32]> {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Dauer in Sekunden
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Dekodiert Little-Endian i16 PCM nach f32
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32) -> Result<AudioBuffer, PcmError> {
    if bytes.len() % 2 != 0 {
        return Err(PcmError::OddLength(bytes.len()));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    Ok(AudioBuffer::new(samples, sample_rate))
}

/// Dekodiert eine base64-Payload aus einer Server-Nachricht (24kHz mono)
pub fn decode_base64_frame(payload: &str) -> Result<AudioBuffer, PcmError> {
    let bytes = BASE64.decode(payload.trim())?;
    decode_pcm16(&bytes, OUTPUT_SAMPLE_RATE)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_bounds() {
        assert_eq!(quantize_sample(1.0), 32767);
        assert_eq!(quantize_sample(-1.0), -32768);
        assert_eq!(quantize_sample(0.0), 0);
    }

    #[test]
    fn test_quantize_clamps_out_of_range() {
        assert_eq!(quantize_sample(1.7), 32767);
        assert_eq!(quantize_sample(-3.0), -32768);
        assert_eq!(quantize_sample(f32::NAN), 0);
    }

    #[test]
    fn test_quantize_asymmetric_scale() {
        assert_eq!(quantize_sample(0.5), 16383);
        assert_eq!(quantize_sample(-0.5), -16384);
    }

    #[test]
    fn test_chunk_bytes_little_endian() {
        let chunk = PcmChunk::encode(&[1.0, -1.0]);
        assert_eq!(chunk.to_bytes(), vec![0xff, 0x7f, 0x00, 0x80]);
        assert_eq!(chunk.mime_type(), "audio/pcm;rate=16000");
    }

    #[test]
    fn test_decode_frame_duration() {
        // 12000 Samples @ 24kHz = 0.5s
        let bytes = vec![0u8; 24000];
        let payload = BASE64.encode(&bytes);
        let buffer = decode_base64_frame(&payload).unwrap();
        assert_eq!(buffer.len(), 12000);
        assert_eq!(buffer.sample_rate(), OUTPUT_SAMPLE_RATE);
        assert!((buffer.duration() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_decode_scales_to_unit_range() {
        let buffer = decode_pcm16(&[0x00, 0x80, 0x00, 0x40], OUTPUT_SAMPLE_RATE).unwrap();
        assert_eq!(buffer.samples()[0], -1.0);
        assert_eq!(buffer.samples()[1], 0.5);
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        assert!(matches!(
            decode_pcm16(&[1, 2, 3], OUTPUT_SAMPLE_RATE),
            Err(PcmError::OddLength(3))
        ));
        assert!(matches!(
            decode_base64_frame("not base64!!"),
            Err(PcmError::Base64(_))
        ));
    }
}
