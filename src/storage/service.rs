//! Tiered persistence service.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::backend::{BackendKind, StorageBackend};
use super::file_collection::FileCollectionStore;
use super::file_kv::FileKeyValueStore;
use super::memory::MemoryStore;
use crate::error::{ConfigError, StorageError};
use crate::models::Chat;

/// Collection names.
pub mod collections {
    /// Scalars stored by key.
    pub const KEY_VALUE: &str = "keyValue";
    pub const CHATS: &str = "chats";
    pub const PREFERENCES: &str = "preferences";
}

/// Record key of the saved preferences.
pub const PREFERENCES_KEY: &str = "userPreferences";
/// `keyValue` entry naming the chat to reopen on start.
pub const LAST_ACTIVE_CHAT_KEY: &str = "lastActiveChatId";
/// Chats kept when a write runs out of quota.
pub const CHATS_KEPT_ON_QUOTA: usize = 10;

/// Which backends `initialize` may try.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageMode {
    /// Structured, then simple, then memory.
    #[default]
    Auto,
    /// Structured, then memory.
    File,
    /// Simple, then memory.
    KeyValue,
    Memory,
}

impl FromStr for StorageMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(StorageMode::Auto),
            "file" => Ok(StorageMode::File),
            "kv" => Ok(StorageMode::KeyValue),
            "memory" => Ok(StorageMode::Memory),
            other => Err(ConfigError::InvalidValue {
                key: "storage".to_string(),
                message: format!("expected auto, file, kv or memory, got '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub mode: StorageMode,
    pub data_dir: PathBuf,
    /// Byte quota applied to the file backends.
    pub quota_bytes: Option<u64>,
}

impl StorageConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode: StorageMode::Auto,
            data_dir: data_dir.into(),
            quota_bytes: None,
        }
    }

    pub fn with_mode(mut self, mode: StorageMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    fn structured(&self) -> Arc<dyn StorageBackend> {
        let store = FileCollectionStore::new(self.data_dir.join("collections"));
        Arc::new(match self.quota_bytes {
            Some(quota) => store.with_quota(quota),
            None => store,
        })
    }

    fn simple(&self) -> Arc<dyn StorageBackend> {
        let store = FileKeyValueStore::new(self.data_dir.join("store.json"));
        Arc::new(match self.quota_bytes {
            Some(quota) => store.with_quota(quota),
            None => store,
        })
    }

    /// Backends to try, in preference order.
    pub fn candidates(&self) -> Vec<Arc<dyn StorageBackend>> {
        let memory: Arc<dyn StorageBackend> = Arc::new(MemoryStore::new());
        match self.mode {
            StorageMode::Auto => vec![self.structured(), self.simple(), memory],
            StorageMode::File => vec![self.structured(), memory],
            StorageMode::KeyValue => vec![self.simple(), memory],
            StorageMode::Memory => vec![memory],
        }
    }
}

/// Most recent modification time of a chat record, in epoch millis.
fn recency(record: &Value) -> i64 {
    record
        .get("updatedAt")
        .and_then(Value::as_i64)
        .or_else(|| record.get("createdAt").and_then(Value::as_i64))
        .unwrap_or(0)
}

/// Persistence facade over the first backend that works.
///
/// Failures never reach callers: they are logged and reported as
/// `None`, `false` or an empty list.
#[derive(Clone)]
pub struct StorageService {
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl StorageService {
    pub async fn initialize(config: &StorageConfig) -> Self {
        Self::select(config.candidates()).await
    }

    /// Keep the first candidate whose probe succeeds, or memory.
    pub async fn select(candidates: Vec<Arc<dyn StorageBackend>>) -> Self {
        for backend in candidates {
            match backend.probe().await {
                Ok(()) => {
                    tracing::info!("Using {} storage", backend.kind());
                    return Self { backend };
                }
                Err(e) => tracing::warn!("{} storage unavailable: {}", backend.kind(), e),
            }
        }
        tracing::warn!("No storage backend available, chats will not persist");
        Self::memory()
    }

    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn memory() -> Self {
        Self::with_backend(Arc::new(MemoryStore::new()))
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub async fn get_item(&self, key: &str, collection: &str) -> Option<Value> {
        match self.backend.get(collection, key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to read {}/{}: {}", collection, key, e);
                None
            }
        }
    }

    /// Store `value` under `key`. Records of named collections get an `id`
    /// field equal to the key when they lack one.
    pub async fn set_item(&self, key: &str, value: Value, collection: &str) -> bool {
        let value = match value {
            Value::Object(mut record) if collection != collections::KEY_VALUE => {
                record
                    .entry("id")
                    .or_insert_with(|| Value::String(key.to_string()));
                Value::Object(record)
            }
            other => other,
        };

        match self.backend.set(collection, key, &value).await {
            Ok(()) => true,
            Err(e) if e.is_quota_exceeded() => {
                tracing::warn!("{}, evicting old chats", e);
                self.evict_old_chats(CHATS_KEPT_ON_QUOTA).await;
                match self.backend.set(collection, key, &value).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::error!("Failed to write {}/{} after eviction: {}", collection, key, e);
                        false
                    }
                }
            }
            Err(e) => {
                tracing::error!("Failed to write {}/{}: {}", collection, key, e);
                false
            }
        }
    }

    pub async fn remove_item(&self, key: &str, collection: &str) -> bool {
        match self.backend.remove(collection, key).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!("Failed to remove {}/{}: {}", collection, key, e);
                false
            }
        }
    }

    pub async fn get_all_items(&self, collection: &str) -> Vec<Value> {
        match self.backend.get_all(collection).await {
            Ok(values) => values,
            Err(e) => {
                tracing::error!("Failed to list {}: {}", collection, e);
                Vec::new()
            }
        }
    }

    pub async fn clear(&self) -> bool {
        match self.backend.clear().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to clear storage: {}", e);
                false
            }
        }
    }

    /// Shorthand for the `keyValue` collection.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_item(key, collections::KEY_VALUE).await
    }

    pub async fn set(&self, key: &str, value: Value) -> bool {
        self.set_item(key, value, collections::KEY_VALUE).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str, collection: &str) -> Option<T> {
        let value = self.get_item(key, collection).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                tracing::warn!("Ignoring malformed {}/{}: {}", collection, key, e);
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, collection: &str) -> bool {
        match serde_json::to_value(value) {
            Ok(value) => self.set_item(key, value, collection).await,
            Err(e) => {
                tracing::error!("Failed to serialize {}/{}: {}", collection, key, StorageError::from(e));
                false
            }
        }
    }

    pub async fn save_chat(&self, chat: &Chat) -> bool {
        let mut record = chat.clone();
        record.dirty = false;
        self.set_json(&chat.id, &record, collections::CHATS).await
    }

    /// Saved chats, most recently updated first. Unreadable records are
    /// skipped.
    pub async fn load_chats(&self) -> Vec<Chat> {
        let mut chats: Vec<Chat> = self
            .get_all_items(collections::CHATS)
            .await
            .into_iter()
            .filter_map(|record| match serde_json::from_value::<Chat>(record) {
                Ok(mut chat) => {
                    chat.dirty = false;
                    Some(chat)
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable chat record: {}", e);
                    None
                }
            })
            .collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        chats
    }

    pub async fn delete_chat(&self, chat_id: &str) -> bool {
        self.remove_item(chat_id, collections::CHATS).await
    }

    /// Delete all but the `keep` most recently updated chats. Returns how
    /// many were removed.
    pub async fn evict_old_chats(&self, keep: usize) -> usize {
        let mut records = self.get_all_items(collections::CHATS).await;
        if records.len() <= keep {
            return 0;
        }
        records.sort_by_key(|record| std::cmp::Reverse(recency(record)));

        let mut removed = 0;
        for record in records.iter().skip(keep) {
            let Some(id) = record.get("id").and_then(Value::as_str) else {
                continue;
            };
            if self.remove_item(id, collections::CHATS).await {
                removed += 1;
            }
        }
        tracing::info!("Evicted {} old chats", removed);
        removed
    }
}
