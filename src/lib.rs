//! pchat - Messenger mit Echtzeit-AI-Anrufen
//!
//! Kern eines Messaging-Clients mit:
//! - Mock-Kontakten und einem AI-Kontakt
//! - Bidirektionalem Echtzeit-Audio mit dem Modell (Live-Call)
//! - Simulierten Anrufen zu allen anderen Kontakten
//! - SQLite Key-Value Store für den lokalen Zustand

pub mod ai;
pub mod call_engine;
pub mod chat;
pub mod config;
pub mod database;
pub mod live;

use ai::{AiError, GeminiChat};
use call_engine::{CallEngine, CallEngineError, CallEvent, CallTarget};
use chat::{AuthError, AuthService, ChatError, ChatState, Message, User};
use config::{AppConfig, DEFAULT_LOG_DIRECTIVE};
use database::{LocalStore, StoreError};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Call(#[from] CallEngineError),

    #[error(transparent)]
    Ai(#[from] AiError),
}

// ============================================================================
// LOGGING
// ============================================================================

/// Initialisiert tracing einmalig pro Prozess
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        DEFAULT_LOG_DIRECTIVE
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
    );

    // Zweiter Aufruf (z.B. in Tests) ist ein No-op
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Antwort auf `send_message`
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message: Message,
    /// Antwort des AI-Kontakts
    pub reply: Option<Message>,
}

/// Application State
pub struct PchatApp {
    config: AppConfig,
    chat: Arc<Mutex<ChatState>>,
    call_engine: Arc<CallEngine>,
    ai: GeminiChat,
    auth: AuthService,
}

impl PchatApp {
    /// Initialisiert Logging, Store und alle Services
    pub fn init(config: AppConfig) -> Result<Arc<Self>, AppError> {
        init_logging();

        tracing::info!("Initializing pchat...");

        let store = match config.db_path.as_deref() {
            Some(path) => LocalStore::open_at(path)?,
            None => LocalStore::open()?,
        };

        let app = Self::with_store(config, Arc::new(store), AuthService::new())?;
        Ok(Arc::new(app))
    }

    /// Baut den State auf einem bestehenden Store auf
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
    pub fn with_store(
        config: AppConfig,
        store: Arc<LocalStore>,
        auth: AuthService,
    ) -> Result<Self, AppError> {
        let chat = Arc::new(Mutex::new(ChatState::load(store)?));
        let call_engine = Arc::new(CallEngine::new());
        let ai = GeminiChat::new(config.api_key.clone(), &config.chat_model)?;

        if config.api_key.is_none() {
            tracing::warn!("No API key configured, AI features will fall back");
        }

        Self::spawn_call_record_writer(&call_engine, Arc::clone(&chat));

        Ok(Self {
            config,
            chat,
            call_engine,
            ai,
            auth,
        })
    }

    /// Schreibt jeden beendeten Anruf in die Anrufliste
    fn spawn_call_record_writer(call_engine: &CallEngine, chat: Arc<Mutex<ChatState>>) {
        let mut events = call_engine.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(CallEvent::Ended(record)) => {
                        tracing::info!(
                            "Recording call with {} ({})",
                            record.user_id,
                            record.format_duration()
                        );
                        if let Err(e) = chat.lock().append_call_record(record) {
                            tracing::error!("Failed to persist call record: {}", e);
                        }
                    }
                    Ok(CallEvent::StateChanged(state)) => {
                        tracing::debug!("Call state changed: {:?}", state);
                    }
                    Ok(CallEvent::Error(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Call event writer lagged by {} event(s)", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Zugriff auf den Chat-State
    pub fn chat(&self) -> MutexGuard<'_, ChatState> {
        self.chat.lock()
    }

    pub fn call_engine(&self) -> &Arc<CallEngine> {
        &self.call_engine
    }

    // ========================================================================
    // ACCOUNT
    // ========================================================================

    pub async fn login_with_email(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<User, AppError> {
        let user = self.auth.login_with_email(email, password, username).await?;
        self.complete_auth(user)
    }

    pub async fn login_with_tiktok(&self, username: &str) -> Result<User, AppError> {
        let user = self.auth.login_with_tiktok(username).await?;
        self.complete_auth(user)
    }

    pub async fn login_with_phone(&self, phone: &str, username: &str) -> Result<User, AppError> {
        let user = self.auth.login_with_phone(phone, username).await?;
        self.complete_auth(user)
    }

    fn complete_auth(&self, user: User) -> Result<User, AppError> {
        self.chat.lock().complete_auth(user.clone())?;
        Ok(user)
    }

    // ========================================================================
    // MESSAGES
    // ========================================================================

    /// Sendet eine Nachricht; der AI-Kontakt antwortet direkt
    pub async fn send_message(
        &self,
        to: &str,
        text: &str,
        media_url: Option<String>,
    ) -> Result<SentMessage, AppError> {
        let (message, history) = {
            let mut chat = self.chat.lock();
            let message = chat.send_message(to, text, media_url)?;
            let is_ai = chat.user(to).map(|u| u.is_ai).unwrap_or(false);
            (message, is_ai.then(|| chat.ai_history(to)))
        };

        let history = match history {
            Some(history) => history,
            None => {
                return Ok(SentMessage {
                    message,
                    reply: None,
                })
            }
        };

        let reply_text = self.ai.reply(&history).await;

        let mut chat = self.chat.lock();
        let reply = chat.receive_message(to, &reply_text)?;
        let feedback = chat.notification_feedback(to, &reply.text);
        if let Some(banner) = feedback.banner.as_deref() {
            tracing::info!("{}", banner);
        }

        Ok(SentMessage {
            message,
            reply: Some(reply),
        })
    }

    // ========================================================================
    // CALLS
    // ========================================================================

    /// Startet einen Anruf; AI-Kontakte bekommen einen Live-Call
    pub fn start_call(&self, contact_id: &str) -> Result<(), AppError> {
        let target = {
            let chat = self.chat.lock();
            let contact = chat
                .user(contact_id)
                .ok_or_else(|| ChatError::UnknownContact(contact_id.to_string()))?;

            if contact.is_ai {
                CallTarget::Live(self.config.live_config())
            } else {
                CallTarget::Simulated {
                    answer_after: self.config.simulated_answer_delay,
                }
            }
        };

        self.call_engine.start_call(contact_id, target)?;
        Ok(())
    }

    pub fn hang_up(&self) -> Result<(), AppError> {
        self.call_engine.hang_up()?;
        Ok(())
    }
}

impl std::fmt::Debug for PchatApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PchatApp")
            .field("call_engine", &self.call_engine)
            .field("chat", &*self.chat.lock())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
