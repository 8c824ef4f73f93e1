//! Text-Chat mit dem AI-Kontakt
//!
//! Einmaliger `generateContent` Request mit dem gesamten Verlauf.
//! Fehler werden in `reply` zu freundlichen Ersatztexten.

use crate::chat::{ChatRole, ChatTurn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Antwort ohne Text
pub const EMPTY_REPLY: &str = "I'm sorry, I couldn't process that.";
/// Antwort bei Netzwerk- oder API-Fehlern
pub const ERROR_REPLY: &str = "Something went wrong with my circuits. Try again?";

pub const CHAT_SYSTEM_INSTRUCTION: &str = "You are a helpful and friendly messaging assistant. Keep your responses concise and engaging, like a real person in a chat app.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AiError {
    #[error("No API key configured")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Response contained no text")]
    EmptyResponse,
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<RequestContent>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateRequest {
    fn new(history: &[ChatTurn], system_instruction: Option<&str>) -> Self {
        let contents = history
            .iter()
            .map(|turn| RequestContent {
                role: Some(match turn.role {
                    ChatRole::User => "user",
                    ChatRole::Model => "model",
                }),
                parts: vec![RequestPart {
                    text: turn.text.clone(),
                }],
            })
            .collect();

        Self {
            contents,
            system_instruction: system_instruction.map(|text| RequestContent {
                role: None,
                parts: vec![RequestPart {
                    text: text.to_string(),
                }],
            }),
        }
    }
}

impl GenerateResponse {
    /// Verketteter Text des ersten Kandidaten
    fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        (!text.is_empty()).then_some(text)
    }
}

// ============================================================================
// CLIENT
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiChat {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    system_instruction: Option<String>,
}

impl GeminiChat {
    pub fn new(api_key: Option<String>, model: &str) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("pchat/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key,
            model: model.to_string(),
            system_instruction: Some(CHAT_SYSTEM_INSTRUCTION.to_string()),
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    /// Sendet den Verlauf und liefert den Antworttext
    pub async fn generate(&self, history: &[ChatTurn]) -> Result<String, AiError> {
        let key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(AiError::MissingApiKey)?;

        let request = GenerateRequest::new(history, self.system_instruction.as_deref());

        tracing::debug!(
            "Requesting chat reply from {} ({} turn(s))",
            self.model,
            history.len()
        );

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        parsed.text().ok_or(AiError::EmptyResponse)
    }

    /// Wie `generate`, aber niemals fehlschlagend
    pub async fn reply(&self, history: &[ChatTurn]) -> String {
        reply_text(self.generate(history).await)
    }
}

fn reply_text(result: Result<String, AiError>) -> String {
    match result {
        Ok(text) => text,
        Err(AiError::EmptyResponse) => EMPTY_REPLY.to_string(),
        Err(e) => {
            tracing::error!("AI chat request failed: {}", e);
            ERROR_REPLY.to_string()
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn turn(role: ChatRole, text: &str) -> ChatTurn {
        ChatTurn {
            role,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_request_shape() {
        let history = vec![turn(ChatRole::User, "hi"), turn(ChatRole::Model, "hey!")];
        let request = GenerateRequest::new(&history, Some("be nice"));

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "contents": [
                    { "role": "user", "parts": [{ "text": "hi" }] },
                    { "role": "model", "parts": [{ "text": "hey!" }] }
                ],
                "systemInstruction": { "parts": [{ "text": "be nice" }] }
            })
        );
    }

    #[test]
    fn test_response_text() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [
                { "content": { "role": "model", "parts": [{ "text": "Hello " }, { "text": "there" }] } }
            ]
        }))
        .unwrap();
        assert_eq!(response.text().as_deref(), Some("Hello there"));

        let empty: GenerateResponse = serde_json::from_value(json!({})).unwrap();
        assert!(empty.text().is_none());

        let blocked: GenerateResponse =
            serde_json::from_value(json!({ "candidates": [{ "finishReason": "SAFETY" }] })).unwrap();
        assert!(blocked.text().is_none());
    }

    #[test]
    fn test_fallback_replies() {
        assert_eq!(reply_text(Ok("ok".to_string())), "ok");
        assert_eq!(reply_text(Err(AiError::EmptyResponse)), EMPTY_REPLY);
        assert_eq!(reply_text(Err(AiError::MissingApiKey)), ERROR_REPLY);
    }

    #[tokio::test]
    async fn test_missing_key_falls_back() {
        let chat = GeminiChat::new(None, "gemini-3-flash-preview").unwrap();
        assert!(matches!(
            chat.generate(&[turn(ChatRole::User, "hi")]).await,
            Err(AiError::MissingApiKey)
        ));
        assert_eq!(chat.reply(&[]).await, ERROR_REPLY);
    }

    #[test]
    fn test_endpoint() {
        let chat = GeminiChat::new(Some("k".to_string()), "gemini-3-flash-preview")
            .unwrap()
            .with_api_base("http://localhost:9000/v1beta/");
        assert_eq!(
            chat.endpoint(),
            "http://localhost:9000/v1beta/models/gemini-3-flash-preview:generateContent"
        );
    }
}
