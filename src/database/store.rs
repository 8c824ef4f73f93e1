//! Lokaler Key-Value Store
//!
//! SQLite-Datenbank mit einer einzigen Tabelle `kv`.
//! Jeder Eintrag ist ein opaker JSON-Blob unter einem festen Schlüssel.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// STORAGE KEYS
// ============================================================================

/// Feste Schlüssel der persistierten Records
pub mod keys {
    pub const MESSAGES: &str = "pchat_messages";
    pub const DRAFTS: &str = "pchat_drafts";
    pub const AUTH: &str = "pchat_auth_session";
    pub const USERS: &str = "pchat_registered_users";
    pub const NOTIFICATIONS: &str = "pchat_notification_prefs";
    pub const CALL_HISTORY: &str = "pchat_call_history";
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Corrupt record '{key}': {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// STORE
// ============================================================================

/// SQLite Key-Value Store (Thread-safe durch Mutex)
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Öffnet oder erstellt den Store im App-Datenverzeichnis
    pub fn open() -> Result<Self, StoreError> {
        let db_path = Self::default_path()?;
        Self::open_at(&db_path)
    }

    /// Öffnet oder erstellt den Store unter `path`
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        // Parent-Verzeichnis erstellen
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Opening local store at {:?}", path);

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// In-Memory Store für Tests
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Ermittelt den Pfad zur Datenbank-Datei
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let proj_dirs = directories::ProjectDirs::from("com", "pchat", "pchat").ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine app data directory",
            )
        })?;

        let mut path = proj_dirs.data_dir().to_path_buf();
        path.push("pchat.db");
        Ok(path)
    }

    /// Initialisiert das Datenbank-Schema
    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            [],
        )?;
        Ok(())
    }

    /// Liest den Roh-Blob unter `key`
    pub fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Liest und deserialisiert den Record unter `key`
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_raw(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Json {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Serialisiert und schreibt `value` unter `key`
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })?;

        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO kv (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = datetime('now')
            "#,
            params![key, raw],
        )?;
        Ok(())
    }

    /// Löscht den Record unter `key`
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_set_and_get_record() {
        let store = LocalStore::open_in_memory().unwrap();

        let mut drafts = BTreeMap::new();
        drafts.insert("user-2".to_string(), "see you".to_string());
        store.set(keys::DRAFTS, &drafts).unwrap();

        let loaded: BTreeMap<String, String> = store.get(keys::DRAFTS).unwrap().unwrap();
        assert_eq!(loaded, drafts);
    }

    #[test]
    fn test_overwrite_and_remove() {
        let store = LocalStore::open_in_memory().unwrap();

        store.set(keys::AUTH, &vec![1, 2, 3]).unwrap();
        store.set(keys::AUTH, &vec![4]).unwrap();
        assert_eq!(store.get::<Vec<i32>>(keys::AUTH).unwrap(), Some(vec![4]));

        store.remove(keys::AUTH).unwrap();
        assert_eq!(store.get::<Vec<i32>>(keys::AUTH).unwrap(), None);
    }

    #[test]
    fn test_corrupt_record_reports_key() {
        let store = LocalStore::open_in_memory().unwrap();
        store.set(keys::MESSAGES, "not a list").unwrap();

        match store.get::<Vec<String>>(keys::MESSAGES) {
            Err(StoreError::Json { key, .. }) => assert_eq!(key, keys::MESSAGES),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_open_at_creates_directory() {
        let dir = std::env::temp_dir().join(format!("pchat-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("pchat.db");

        {
            let store = LocalStore::open_at(&path).unwrap();
            store.set(keys::CALL_HISTORY, &Vec::<u8>::new()).unwrap();
        }

        let reopened = LocalStore::open_at(&path).unwrap();
        assert_eq!(
            reopened.get::<Vec<u8>>(keys::CALL_HISTORY).unwrap(),
            Some(Vec::new())
        );
        let _ = std::fs::remove_dir_all(dir);
    }
}
