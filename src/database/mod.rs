//! Database Module - Lokale Persistenz
//!
//! Ersetzt den Browser-Storage: feste Schlüssel, JSON-Blobs,
//! keine Schema-Versionierung.

mod store;

pub use store::{keys, LocalStore, StoreError};
