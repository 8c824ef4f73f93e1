//! Konfiguration aus Umgebungsvariablen
//!
//! Alle Werte haben Defaults, nur der API-Key ist für AI-Funktionen nötig.

use crate::call_engine::DEFAULT_SIMULATED_ANSWER_DELAY;
use crate::live::{LiveConfig, DEFAULT_LIVE_ENDPOINT};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_VOICE: &str = "Zephyr";
pub const LIVE_SYSTEM_INSTRUCTION: &str = "You are a friendly friend on a phone call.";

/// Default-Direktive für tracing, `RUST_LOG` kommt hinzu
pub const DEFAULT_LOG_DIRECTIVE: &str = "pchat=debug";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub live_endpoint: String,
    pub live_model: String,
    pub chat_model: String,
    pub voice_name: String,
    /// `None` = App-Datenverzeichnis
    pub db_path: Option<PathBuf>,
    pub simulated_answer_delay: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            live_endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
            live_model: DEFAULT_LIVE_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            voice_name: DEFAULT_VOICE.to_string(),
            db_path: None,
            simulated_answer_delay: DEFAULT_SIMULATED_ANSWER_DELAY,
        }
    }
}

impl AppConfig {
    /// Liest die Prozess-Umgebung
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Baut die Konfiguration aus einer beliebigen Quelle
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Self {
            api_key: get("GEMINI_API_KEY").or_else(|| get("API_KEY")),
            live_endpoint: get("PCHAT_LIVE_ENDPOINT").unwrap_or(defaults.live_endpoint),
            live_model: get("PCHAT_LIVE_MODEL").unwrap_or(defaults.live_model),
            chat_model: get("PCHAT_CHAT_MODEL").unwrap_or(defaults.chat_model),
            voice_name: get("PCHAT_VOICE").unwrap_or(defaults.voice_name),
            db_path: get("PCHAT_DB_PATH").map(PathBuf::from),
            simulated_answer_delay: get("PCHAT_SIMULATED_ANSWER_MS")
                .and_then(|ms| ms.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.simulated_answer_delay),
        }
    }

    /// Parameter für einen Live-Call
    pub fn live_config(&self) -> LiveConfig {
        LiveConfig {
            endpoint: self.live_endpoint.clone(),
            api_key: self.api_key.clone(),
            model: self.live_model.clone(),
            voice_name: self.voice_name.clone(),
            system_instruction: Some(LIVE_SYSTEM_INSTRUCTION.to_string()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
