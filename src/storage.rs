//! Raw key-value backing stores.
//!
//! A [`KeyValueStore`] persists opaque string payloads by key, the way a
//! browser's local storage does. Two implementations ship with the crate:
//!
//! - [`file::FileStore`]: one JSON file per key inside a data directory,
//!   written atomically
//! - [`sqlite::SqliteStore`]: a single `kv` table in SQLite
//!
//! Stores know nothing about records, validation or backups; that is the job
//! of [`crate::recovery::DomainGuard`].

pub mod file;
pub mod sqlite;

use crate::error::{MarginError, MarginResult};
use async_trait::async_trait;

pub use file::FileStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Short backend name for logs and diagnostics.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> MarginResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> MarginResult<()>;

    /// Removes a key; returns whether it existed.
    async fn remove(&self, key: &str) -> MarginResult<bool>;

    /// All keys starting with `prefix`, in ascending order.
    async fn keys_with_prefix(&self, prefix: &str) -> MarginResult<Vec<String>>;
}

/// Keys are limited to `[A-Za-z0-9._:-]` so every backend can store them verbatim.
pub fn validate_key(key: &str) -> MarginResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'));

    if valid {
        Ok(())
    } else {
        Err(MarginError::Validation(format!("invalid storage key '{key}'")))
    }
}
