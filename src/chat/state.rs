//! Chat State
//!
//! Hält Kontakte, Nachrichten, Entwürfe, Benachrichtigungs-Einstellungen
//! und Anrufliste. Jede Mutation schreibt den betroffenen Record sofort
//! in den lokalen Store; gelesen wird einmal beim Start.

use super::types::*;
use crate::database::{keys, LocalStore, StoreError};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Vibrationsdauer bei neuen Nachrichten
pub const VIBRATION_MS: u64 = 200;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("You can't add yourself")]
    CannotAddSelf,

    #[error("User @{0} not found")]
    UserNotFound(String),

    #[error("Unknown contact: {0}")]
    UnknownContact(String),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

// ============================================================================
// HELPER TYPES
// ============================================================================

/// Rolle eines Eintrags im AI-Verlauf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

/// Rückmeldung an den Benutzer bei einer neuen Nachricht
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationFeedback {
    /// Banner-Text in der App
    pub banner: Option<String>,
    pub sound: Option<NotificationSound>,
    pub vibrate_ms: Option<u64>,
    /// Benachrichtigung auf OS-Ebene (Titel, Text)
    pub system: Option<(String, String)>,
}

impl NotificationFeedback {
    pub fn is_silent(&self) -> bool {
        *self == Self::default()
    }
}

// ============================================================================
// CHAT STATE
// ============================================================================

pub struct ChatState {
    store: Arc<LocalStore>,
    current_user: Option<User>,
    users: Vec<User>,
    messages: Vec<Message>,
    drafts: BTreeMap<String, String>,
    notification_settings: NotificationSettings,
    call_history: Vec<CallRecord>,
}

impl ChatState {
    /// Lädt alle Records aus dem Store
    pub fn load(store: Arc<LocalStore>) -> Result<Self, ChatError> {
        let current_user = store.get::<User>(keys::AUTH)?;
        let messages = store.get::<Vec<Message>>(keys::MESSAGES)?.unwrap_or_default();
        let drafts = store
            .get::<BTreeMap<String, String>>(keys::DRAFTS)?
            .unwrap_or_default();
        let notification_settings = store
            .get::<NotificationSettings>(keys::NOTIFICATIONS)?
            .unwrap_or_default();
        let call_history = store
            .get::<Vec<CallRecord>>(keys::CALL_HISTORY)?
            .unwrap_or_default();

        // Mock-Kontakte + registrierte Benutzer ohne Duplikate
        let mut users = MOCK_USERS.clone();
        for user in store.get::<Vec<User>>(keys::USERS)?.unwrap_or_default() {
            if !users.iter().any(|u| u.id == user.id) {
                users.push(user);
            }
        }

        tracing::info!(
            "Chat state loaded: {} user(s), {} message(s), {} call record(s)",
            users.len(),
            messages.len(),
            call_history.len()
        );

        Ok(Self {
            store,
            current_user,
            users,
            messages,
            drafts,
            notification_settings,
            call_history,
        })
    }

    // ========================================================================
    // ACCOUNT
    // ========================================================================

    pub fn current_user(&self) -> Option<&User> {
        self.current_user.as_ref()
    }

    fn me(&self) -> Result<&User, ChatError> {
        self.current_user.as_ref().ok_or(ChatError::NotSignedIn)
    }

    /// Übernimmt den angemeldeten Benutzer
    pub fn complete_auth(&mut self, user: User) -> Result<(), ChatError> {
        if !self.users.iter().any(|u| u.username == user.username) {
            self.users.push(user.clone());
            self.persist_users()?;
        }
        tracing::info!("Signed in as @{}", user.username);
        self.current_user = Some(user);
        self.persist_auth()
    }

    /// Aktualisiert Name und Avatar des eigenen Profils
    pub fn update_profile(&mut self, name: &str, avatar: &str) -> Result<User, ChatError> {
        let mut updated = self.me()?.clone();
        updated.name = name.trim().to_string();
        updated.avatar = avatar.trim().to_string();

        for user in self.users.iter_mut().filter(|u| u.id == updated.id) {
            *user = updated.clone();
        }
        self.current_user = Some(updated.clone());

        self.persist_auth()?;
        self.persist_users()?;
        Ok(updated)
    }

    pub fn logout(&mut self) -> Result<(), ChatError> {
        self.current_user = None;
        self.persist_auth()
    }

    // ========================================================================
    // CONTACTS
    // ========================================================================

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    /// Sucht einen Kontakt anhand des Usernamens
    pub fn find_contact(&self, username: &str) -> Result<&User, ChatError> {
        let username = username.trim().trim_start_matches('@');
        if self.me()?.username == username {
            return Err(ChatError::CannotAddSelf);
        }
        self.users
            .iter()
            .find(|u| u.username == username)
            .ok_or_else(|| ChatError::UserNotFound(username.to_string()))
    }

    /// Kontakte ohne sich selbst, gefiltert nach Name oder Username
    pub fn filtered_contacts(&self, search: &str) -> Vec<&User> {
        let needle = search.to_lowercase();
        let my_id = self.current_user.as_ref().map(|u| u.id.as_str());

        self.users
            .iter()
            .filter(|u| Some(u.id.as_str()) != my_id)
            .filter(|u| {
                u.name.to_lowercase().contains(&needle)
                    || u.username.to_lowercase().contains(&needle)
            })
            .collect()
    }

    // ========================================================================
    // MESSAGES
    // ========================================================================

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Verlauf mit einem Kontakt in Sende-Reihenfolge
    pub fn conversation(&self, contact_id: &str) -> Vec<&Message> {
        match self.current_user.as_ref() {
            Some(me) => self
                .messages
                .iter()
                .filter(|m| m.is_between(&me.id, contact_id))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Neueste Nachricht mit einem Kontakt
    pub fn last_message_with(&self, contact_id: &str) -> Option<&Message> {
        self.conversation(contact_id)
            .into_iter()
            .max_by_key(|m| m.timestamp)
    }

    /// Verlauf als Kontext für den AI-Kontakt
    pub fn ai_history(&self, contact_id: &str) -> Vec<ChatTurn> {
        let my_id = match self.current_user.as_ref() {
            Some(me) => me.id.clone(),
            None => return Vec::new(),
        };

        self.conversation(contact_id)
            .into_iter()
            .map(|m| ChatTurn {
                role: if m.sender_id == my_id {
                    ChatRole::User
                } else {
                    ChatRole::Model
                },
                text: m.text.clone(),
            })
            .collect()
    }

    pub fn draft(&self, contact_id: &str) -> Option<&str> {
        self.drafts.get(contact_id).map(String::as_str)
    }

    pub fn set_draft(&mut self, contact_id: &str, text: &str) -> Result<(), ChatError> {
        if text.is_empty() {
            self.drafts.remove(contact_id);
        } else {
            self.drafts.insert(contact_id.to_string(), text.to_string());
        }
        self.persist_drafts()
    }

    /// Sendet eine Text- oder Bildnachricht
    pub fn send_message(
        &mut self,
        to: &str,
        text: &str,
        media_url: Option<String>,
    ) -> Result<Message, ChatError> {
        let me = self.me()?.id.clone();
        if self.user(to).is_none() {
            return Err(ChatError::UnknownContact(to.to_string()));
        }

        let text = text.trim();
        if text.is_empty() && media_url.is_none() {
            return Err(ChatError::EmptyMessage);
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            sender_id: me,
            receiver_id: to.to_string(),
            text: text.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            read: false,
            kind: if media_url.is_some() {
                MessageKind::Image
            } else {
                MessageKind::Text
            },
            media_url,
            reactions: None,
        };

        self.messages.push(message.clone());
        self.persist_messages()?;

        if self.drafts.remove(to).is_some() {
            self.persist_drafts()?;
        }

        tracing::debug!("Message {} sent to {}", message.id, to);
        Ok(message)
    }

    /// Speichert eine eingehende Nachricht eines Kontakts
    pub fn receive_message(&mut self, from: &str, text: &str) -> Result<Message, ChatError> {
        let me = self.me()?.id.clone();

        let message = Message {
            id: Uuid::new_v4().to_string(),
            sender_id: from.to_string(),
            receiver_id: me,
            text: text.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            read: false,
            kind: MessageKind::Text,
            media_url: None,
            reactions: None,
        };

        self.messages.push(message.clone());
        self.persist_messages()?;
        Ok(message)
    }

    /// Schaltet die eigene Reaktion auf eine Nachricht um
    pub fn toggle_reaction(&mut self, message_id: &str, emoji: &str) -> Result<(), ChatError> {
        let me = self.me()?.id.clone();
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;

        let reactions = message.reactions.get_or_insert_with(BTreeMap::new);
        let users = reactions.entry(emoji.to_string()).or_default();
        if let Some(pos) = users.iter().position(|id| *id == me) {
            users.remove(pos);
        } else {
            users.push(me);
        }

        self.persist_messages()
    }

    // ========================================================================
    // NOTIFICATIONS
    // ========================================================================

    pub fn notification_settings(&self) -> &NotificationSettings {
        &self.notification_settings
    }

    pub fn update_notification_settings(
        &mut self,
        settings: NotificationSettings,
    ) -> Result<(), ChatError> {
        self.notification_settings = settings;
        self.persist_notifications()
    }

    pub fn is_muted(&self, user_id: &str) -> bool {
        self.notification_settings
            .muted_user_ids
            .iter()
            .any(|id| id == user_id)
    }

    /// Schaltet Stummschaltung um; gibt den neuen Status zurück
    pub fn toggle_mute(&mut self, user_id: &str) -> Result<bool, ChatError> {
        let muted = &mut self.notification_settings.muted_user_ids;
        let now_muted = if let Some(pos) = muted.iter().position(|id| id == user_id) {
            muted.remove(pos);
            false
        } else {
            muted.push(user_id.to_string());
            true
        };

        self.persist_notifications()?;
        Ok(now_muted)
    }

    /// Entscheidet, wie eine neue Nachricht gemeldet wird
    pub fn notification_feedback(&self, sender_id: &str, text: &str) -> NotificationFeedback {
        let settings = &self.notification_settings;

        if self.current_user.as_ref().map(|u| u.id.as_str()) == Some(sender_id)
            || self.is_muted(sender_id)
        {
            return NotificationFeedback::default();
        }

        let sender = self.user(sender_id);
        let sender_name = sender.map(|u| u.name.clone());

        NotificationFeedback {
            banner: settings.enabled.then(|| {
                format!(
                    "New message from {}",
                    sender_name.as_deref().unwrap_or("unknown")
                )
            }),
            sound: (settings.sound != NotificationSound::None).then_some(settings.sound),
            vibrate_ms: settings.vibration.then_some(VIBRATION_MS),
            system: settings.system_enabled.then(|| {
                (
                    sender_name.unwrap_or_else(|| "New Message".to_string()),
                    text.to_string(),
                )
            }),
        }
    }

    // ========================================================================
    // CALL HISTORY
    // ========================================================================

    pub fn call_history(&self) -> &[CallRecord] {
        &self.call_history
    }

    pub fn append_call_record(&mut self, record: CallRecord) -> Result<(), ChatError> {
        self.call_history.push(record);
        self.persist_call_history()
    }

    pub fn clear_call_history(&mut self) -> Result<(), ChatError> {
        self.call_history.clear();
        self.persist_call_history()
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    fn persist_auth(&self) -> Result<(), ChatError> {
        match self.current_user.as_ref() {
            Some(user) => self.store.set(keys::AUTH, user)?,
            None => self.store.remove(keys::AUTH)?,
        }
        Ok(())
    }

    /// Nur selbst registrierte Benutzer, keine Mock-Kontakte
    fn persist_users(&self) -> Result<(), ChatError> {
        let custom: Vec<&User> = self.users.iter().filter(|u| !is_mock_user(&u.id)).collect();
        Ok(self.store.set(keys::USERS, &custom)?)
    }

    fn persist_messages(&self) -> Result<(), ChatError> {
        Ok(self.store.set(keys::MESSAGES, &self.messages)?)
    }

    fn persist_drafts(&self) -> Result<(), ChatError> {
        Ok(self.store.set(keys::DRAFTS, &self.drafts)?)
    }

    fn persist_notifications(&self) -> Result<(), ChatError> {
        Ok(self
            .store
            .set(keys::NOTIFICATIONS, &self.notification_settings)?)
    }

    fn persist_call_history(&self) -> Result<(), ChatError> {
        Ok(self.store.set(keys::CALL_HISTORY, &self.call_history)?)
    }
}

impl std::fmt::Debug for ChatState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatState")
            .field("current_user", &self.current_user.as_ref().map(|u| &u.username))
            .field("users", &self.users.len())
            .field("messages", &self.messages.len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
