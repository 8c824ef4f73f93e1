//! Message Types für das Live-Protokoll
//!
//! JSON-Strukturen der bidirektionalen Streaming-Session
//! (`BidiGenerateContent`). Feldnamen sind camelCase auf dem Draht.

use serde::{Deserialize, Serialize};

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Erste Nachricht nach dem Verbindungsaufbau
#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Vollständiger Modellname (`models/...`)
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
    Text,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

impl SetupMessage {
    /// Audio-Antworten mit vorgefertigter Stimme
    pub fn audio(model: &str, voice_name: &str, system_instruction: Option<&str>) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };

        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec![Modality::Audio],
                    speech_config: Some(SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice_name.to_string(),
                            },
                        },
                    }),
                },
                system_instruction: system_instruction.map(|text| Content {
                    parts: vec![TextPart {
                        text: text.to_string(),
                    }],
                }),
            },
        }
    }
}

/// Audio-Upload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaBlob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

impl RealtimeInputMessage {
    pub fn media(mime_type: &str, data: String) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaBlob {
                    mime_type: mime_type.to_string(),
                    data,
                }],
            },
        }
    }
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// Server-Nachricht; genau eines der Felder ist gesetzt
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    #[serde(default)]
    pub inline_data: Option<MediaBlob>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// base64-Audio aus dem ersten Part des Model-Turns
    pub fn audio_payload(&self) -> Option<&str> {
        self.server_content
            .as_ref()?
            .model_turn
            .as_ref()?
            .parts
            .first()?
            .inline_data
            .as_ref()
            .map(|blob| blob.data.as_str())
    }

    pub fn is_turn_complete(&self) -> bool {
        self.server_content
            .as_ref()
            .map(|c| c.turn_complete)
            .unwrap_or(false)
    }
}

// ============================================================================
// TESTS
// ============================================================================
