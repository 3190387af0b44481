//! File Store - Atomic JSON Key/Value Persistence
//!
//! Keeps the key/value map in `kv.json` using atomic writes (write to
//! tmp file, then rename). The file is always either the old or the
//! new version, never a partial write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::ports::cursor_store::KeyValueStore;

/// Atomic JSON file key/value store.
///
/// The whole map is cached in memory and rewritten on every `set`;
/// it only ever holds a handful of keys.
pub struct JsonFileStore {
    /// Path to kv.json.
    path: PathBuf,
    /// Temporary path for atomic writes.
    tmp_path: PathBuf,
    /// Cached contents; the lock also serializes writers.
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or create) the store in the given data directory.
    ///
    /// # Errors
    /// Fails if the directory cannot be created or an existing file is
    /// unreadable or not a JSON object of strings.
    #[instrument]
    pub async fn open(data_dir: &str) -> Result<Self> {
        let dir = Path::new(data_dir);
        fs::create_dir_all(dir)
            .await
            .context("Failed to create data directory")?;

        let path = dir.join("kv.json");
        let entries = if fs::try_exists(&path).await.unwrap_or(false) {
            let json = fs::read_to_string(&path)
                .await
                .context("Failed to read kv file")?;
            serde_json::from_str(&json).context("Failed to parse kv JSON")?
        } else {
            info!(path = %path.display(), "No kv file found, starting fresh");
            BTreeMap::new()
        };

        Ok(Self {
            tmp_path: dir.join("kv.json.tmp"),
            path,
            entries: Mutex::new(entries),
        })
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());

        let json = serde_json::to_string_pretty(&*entries).context("Failed to serialize kv map")?;

        fs::write(&self.tmp_path, &json)
            .await
            .context("Failed to write tmp kv file")?;

        fs::rename(&self.tmp_path, &self.path)
            .await
            .context("Failed to rename kv file")?;

        debug!(key, value, "Key persisted");
        Ok(())
    }
}
