//! Cursor Store Port - Resume Cursor Persistence
//!
//! The cursor is the only state that outlives a session: a single
//! string-encoded unsigned integer under a configurable key in an
//! externally supplied key/value store. A missing key means cursor 0.

use async_trait::async_trait;
use thiserror::Error;

/// Failures reading the persisted cursor.
#[derive(Error, Debug)]
pub enum CursorError {
    #[error("cursor under key {key:?} is not an unsigned integer: {value:?}")]
    Malformed { key: String, value: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Minimal string key/value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read a value; `None` when the key is absent.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// Load the cursor stored under `key` (absent = 0).
///
/// # Errors
/// [`CursorError::Malformed`] if the stored value does not parse, or
/// [`CursorError::Store`] if the store itself fails.
pub async fn load_cursor(store: &dyn KeyValueStore, key: &str) -> Result<u64, CursorError> {
    match store.get(key).await? {
        None => Ok(0),
        Some(value) => value.trim().parse().map_err(|_| CursorError::Malformed {
            key: key.to_string(),
            value,
        }),
    }
}

/// Persist the cursor under `key`.
///
/// # Errors
/// Propagates the store's failure.
pub async fn save_cursor(store: &dyn KeyValueStore, key: &str, cursor: u64) -> anyhow::Result<()> {
    store.set(key, &cursor.to_string()).await
}
