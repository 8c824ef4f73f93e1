//! Datenmodell des Messengers
//!
//! Die Strukturen werden 1:1 als JSON im lokalen Store abgelegt
//! (camelCase Feldnamen, optionale Felder werden weggelassen).

use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// USERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
    Away,
}

/// Kontakt oder eigenes Profil
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub avatar: String,
    pub status: Presence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
    #[serde(default, rename = "isAI", skip_serializing_if = "std::ops::Not::not")]
    pub is_ai: bool,
}

/// ID des AI-Kontakts
pub const AI_CONTACT_ID: &str = "ai-assistant";

fn mock_user(id: &str, username: &str, name: &str, seed: &str, status: Presence) -> User {
    User {
        id: id.to_string(),
        username: username.to_string(),
        name: name.to_string(),
        email: None,
        avatar: format!("https://api.dicebear.com/7.x/avataaars/svg?seed={}", seed),
        status,
        last_seen: None,
        is_ai: false,
    }
}

/// Vorinstallierte Kontakte
pub static MOCK_USERS: Lazy<Vec<User>> = Lazy::new(|| {
    let mut assistant = mock_user(AI_CONTACT_ID, "gemini", "Gemini AI", "ai", Presence::Online);
    assistant.avatar = "https://api.dicebear.com/7.x/bottts/svg?seed=ai".to_string();
    assistant.is_ai = true;

    let mut alex = mock_user("user-3", "alex_r", "Alex Rivera", "alex", Presence::Offline);
    alex.last_seen = Some(Utc::now().timestamp_millis() - 3_600_000);

    vec![
        assistant,
        mock_user("user-2", "sarah_c", "Sarah Chen", "sarah", Presence::Online),
        alex,
        mock_user("user-4", "jordan_s", "Jordan Smith", "jordan", Presence::Away),
        mock_user("user-5", "elena_g", "Elena Gilbert", "elena", Presence::Online),
    ]
});

pub fn is_mock_user(id: &str) -> bool {
    MOCK_USERS.iter().any(|u| u.id == id)
}

// ============================================================================
// MESSAGES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    pub timestamp: i64,
    pub read: bool,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Emoji → User-IDs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<BTreeMap<String, Vec<String>>>,
}

impl Message {
    /// true wenn die Nachricht zwischen `a` und `b` ausgetauscht wurde
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSound {
    None,
    Pop,
    Ping,
    Ding,
}

impl NotificationSound {
    /// URL des Sound-Assets
    pub fn asset_url(&self) -> Option<&'static str> {
        match self {
            NotificationSound::None => None,
            NotificationSound::Pop => {
                Some("https://assets.mixkit.co/active_storage/sfx/2354/2354-preview.mp3")
            }
            NotificationSound::Ping => {
                Some("https://assets.mixkit.co/active_storage/sfx/2358/2358-preview.mp3")
            }
            NotificationSound::Ding => {
                Some("https://assets.mixkit.co/active_storage/sfx/2359/2359-preview.mp3")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    pub enabled: bool,
    /// Benachrichtigungen auf Betriebssystem-Ebene
    pub system_enabled: bool,
    pub sound: NotificationSound,
    pub vibration: bool,
    #[serde(default)]
    pub muted_user_ids: Vec<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            system_enabled: false,
            sound: NotificationSound::Pop,
            vibration: true,
            muted_user_ids: Vec::new(),
        }
    }
}

// ============================================================================
// CALL HISTORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Incoming,
    Outgoing,
    Missed,
}

/// Unveränderlicher Eintrag der Anrufliste
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: CallKind,
    /// Startzeit (Unix ms)
    pub timestamp: i64,
    /// Sekunden; fehlt wenn der Anruf nie verbunden war
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl CallRecord {
    /// `4m 5s` bzw. `Missed`
    pub fn format_duration(&self) -> String {
        match self.duration {
            Some(secs) => format!("{}m {}s", secs / 60, secs % 60),
            None => "Missed".to_string(),
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

    #[test]
    fn test_mock_users() {
        assert_eq!(MOCK_USERS.len(), 5);
        let ai = &MOCK_USERS[0];
        assert!(ai.is_ai);
        assert_eq!(ai.id, AI_CONTACT_ID);
        assert!(MOCK_USERS[2].last_seen.is_some());
        assert!(is_mock_user("user-4"));
        assert!(!is_mock_user("me-123"));
    }

    #[test]
    fn test_user_json_shape() {
        let value = serde_json::to_value(&MOCK_USERS[0]).unwrap();
        assert_eq!(value["isAI"], json!(true));
        assert_eq!(value["status"], json!("online"));
        assert!(value.get("email").is_none());

        let sarah = serde_json::to_value(&MOCK_USERS[1]).unwrap();
        assert!(sarah.get("isAI").is_none());
    }

    #[test]
    fn test_call_record_json_shape() {
        let record = CallRecord {
            id: "1".to_string(),
            user_id: "user-2".to_string(),
            kind: CallKind::Outgoing,
            timestamp: 1_700_000_000_000,
            duration: None,
        };
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({ "id": "1", "userId": "user-2", "type": "outgoing", "timestamp": 1_700_000_000_000i64 })
        );
        assert_eq!(record.format_duration(), "Missed");

        let parsed: CallRecord = serde_json::from_value(json!({
            "id": "2", "userId": "ai-assistant", "type": "missed", "timestamp": 5, "duration": 125
        }))
        .unwrap();
        assert_eq!(parsed.kind, CallKind::Missed);
        assert_eq!(parsed.format_duration(), "2m 5s");
    }

    #[test]
    fn test_notification_defaults() {
        let settings = NotificationSettings::default();
        assert!(settings.enabled);
        assert!(!settings.system_enabled);
        assert_eq!(settings.sound, NotificationSound::Pop);
        assert!(NotificationSound::None.asset_url().is_none());
        assert_eq!(
            serde_json::to_value(&settings).unwrap()["mutedUserIds"],
            json!([])
        );
    }
}
