//! Mock-Authentifizierung
//!
//! Simuliert Login per E-Mail, TikTok und Telefon mit künstlicher Latenz.
//! Es findet keine echte Prüfung statt.

use super::types::{Presence, User};
use rand::Rng;
use std::time::Duration;
use thiserror::Error;

const AVATAR_BASE: &str = "https://api.dicebear.com/7.x/avataaars/svg?seed=";
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Email address is required")]
    MissingEmail,

    #[error("Phone number is required")]
    MissingPhone,
}

/// Simulierter Auth-Service
#[derive(Debug, Clone)]
pub struct AuthService {
    latency_scale: f64,
}

impl Default for AuthService {
    fn default() -> Self {
        Self { latency_scale: 1.0 }
    }
}

impl AuthService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ohne künstliche Latenz (Tests, CLI)
    pub fn instant() -> Self {
        Self { latency_scale: 0.0 }
    }

    async fn simulate_latency(&self, millis: u64) {
        let scaled = (millis as f64 * self.latency_scale) as u64;
        if scaled > 0 {
            tokio::time::sleep(Duration::from_millis(scaled)).await;
        }
    }

    pub async fn login_with_email(
        &self,
        email: &str,
        _password: &str,
        username: &str,
    ) -> Result<User, AuthError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AuthError::MissingEmail);
        }
        self.simulate_latency(800).await;

        let local_part = email.split('@').next().unwrap_or(email).to_string();
        Ok(User {
            id: random_id("me"),
            username: non_empty_or(username, &local_part),
            name: local_part,
            email: Some(email.to_string()),
            avatar: format!("{}{}", AVATAR_BASE, email),
            status: Presence::Online,
            last_seen: None,
            is_ai: false,
        })
    }

    pub async fn login_with_tiktok(&self, username: &str) -> Result<User, AuthError> {
        self.simulate_latency(1200).await;

        Ok(User {
            id: random_id("tt"),
            username: non_empty_or(username, "tiktok_user"),
            name: "TikTok User".to_string(),
            email: None,
            avatar: format!("{}tiktok", AVATAR_BASE),
            status: Presence::Online,
            last_seen: None,
            is_ai: false,
        })
    }

    pub async fn login_with_phone(&self, phone: &str, username: &str) -> Result<User, AuthError> {
        let phone = phone.trim();
        if phone.is_empty() {
            return Err(AuthError::MissingPhone);
        }
        self.simulate_latency(1000).await;

        let suffix = last_chars(phone, 4);
        Ok(User {
            id: random_id("ph"),
            username: non_empty_or(username, &format!("user_{}", suffix)),
            name: format!("User {}", suffix),
            email: None,
            avatar: format!("{}phone", AVATAR_BASE),
            status: Presence::Online,
            last_seen: None,
            is_ai: false,
        })
    }
}

/// `<prefix>-` + 9 zufällige base-36 Zeichen
fn random_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", prefix, suffix)
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn last_chars(value: &str, n: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    chars[chars.len().saturating_sub(n)..].iter().collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_email_login() {
        let auth = AuthService::instant();
        let user = auth
            .login_with_email("dana@example.com", "hunter2", "")
            .await
            .unwrap();

        assert!(user.id.starts_with("me-"));
        assert_eq!(user.id.len(), 12);
        assert_eq!(user.username, "dana");
        assert_eq!(user.name, "dana");
        assert_eq!(user.email.as_deref(), Some("dana@example.com"));
        assert!(user.avatar.ends_with("seed=dana@example.com"));
        assert_eq!(user.status, Presence::Online);
    }

    #[tokio::test]
    async fn test_tiktok_and_phone_fallbacks() {
        let auth = AuthService::instant();

        let tiktok = auth.login_with_tiktok("  ").await.unwrap();
        assert!(tiktok.id.starts_with("tt-"));
        assert_eq!(tiktok.username, "tiktok_user");
        assert_eq!(tiktok.name, "TikTok User");

        let phone = auth.login_with_phone("+49 170 5551234", "").await.unwrap();
        assert!(phone.id.starts_with("ph-"));
        assert_eq!(phone.username, "user_1234");
        assert_eq!(phone.name, "User 1234");

        let named = auth.login_with_phone("12", "caller").await.unwrap();
        assert_eq!(named.username, "caller");
        assert_eq!(named.name, "User 12");
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let auth = AuthService::instant();
        assert_eq!(
            auth.login_with_email(" ", "pw", "x").await,
            Err(AuthError::MissingEmail)
        );
        assert_eq!(
            auth.login_with_phone("", "x").await,
            Err(AuthError::MissingPhone)
        );
    }

    #[test]
    fn test_random_id_alphabet() {
        let id = random_id("me");
        assert!(id[3..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }
}
