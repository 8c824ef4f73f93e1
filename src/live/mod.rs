//! Live Module - Bidirektionale Audio-Session mit dem Modell
//!
//! Dieses Modul verwaltet:
//! - WebSocket-Verbindung zum Streaming-Endpoint
//! - Setup der Session (Modalität, Stimme, System-Instruktion)
//! - Upload der Mikrofon-Frames und Empfang der Audio-Antworten

mod client;
mod messages;

pub use client::{LiveConfig, LiveError, LiveSession, DEFAULT_LIVE_ENDPOINT};
pub use messages::*;
