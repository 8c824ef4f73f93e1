//! Chat Module
//!
//! Kontakte, Nachrichten, Benachrichtigungen und Anrufliste
//! inklusive Mock-Authentifizierung.

mod auth;
mod state;
mod types;

pub use auth::{AuthError, AuthService};
pub use state::{ChatError, ChatRole, ChatState, ChatTurn, NotificationFeedback, VIBRATION_MS};
pub use types::*;
