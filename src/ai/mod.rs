//! AI Module
//!
//! Text-Antworten des AI-Kontakts über die REST-API.

mod gemini;

pub use gemini::{
    AiError, GeminiChat, CHAT_SYSTEM_INSTRUCTION, DEFAULT_API_BASE, EMPTY_REPLY, ERROR_REPLY,
};
