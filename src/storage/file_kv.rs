//! Simple backend: a single JSON document of `collection/key` entries.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};

use super::backend::{BackendKind, StorageBackend};
use crate::error::StorageError;

type Entries = Map<String, Value>;

fn entry_key(collection: &str, key: &str) -> String {
    format!("{}/{}", collection, key)
}

/// The whole document is loaded on first use and rewritten on every
/// change.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    quota: Option<u64>,
    entries: Mutex<Option<Entries>>,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            quota: None,
            entries: Mutex::new(None),
        }
    }

    /// Limit the size of the serialized document.
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota = Some(bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<Entries, StorageError> {
        match fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Entries::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn entries(&self) -> Result<MutexGuard<'_, Option<Entries>>, StorageError> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_file().await?);
        }
        Ok(guard)
    }

    async fn persist(&self, entries: &Entries, collection: &str) -> Result<(), StorageError> {
        let data = serde_json::to_vec(entries)?;
        if let Some(limit) = self.quota {
            let needed = data.len() as u64;
            if needed > limit {
                return Err(StorageError::QuotaExceeded {
                    collection: collection.to_string(),
                    needed,
                    limit,
                });
            }
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Apply `change` to a copy of the document and keep it only if it
    /// was written.
    async fn update(
        &self,
        collection: &str,
        change: impl FnOnce(&mut Entries) -> bool,
    ) -> Result<bool, StorageError> {
        let mut guard = self.entries().await?;
        let current = guard.get_or_insert_with(Entries::new);
        let mut candidate = current.clone();
        if !change(&mut candidate) {
            return Ok(false);
        }
        self.persist(&candidate, collection).await?;
        *current = candidate;
        Ok(true)
    }
}

#[async_trait]
impl StorageBackend for FileKeyValueStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Simple
    }

    async fn probe(&self) -> Result<(), StorageError> {
        let unavailable = |e: StorageError| StorageError::Unavailable {
            backend: BackendKind::Simple.to_string(),
            message: format!("{}: {}", self.path.display(), e),
        };
        let guard = self.entries().await.map_err(unavailable)?;
        let current = guard.clone().unwrap_or_default();
        self.persist(&current, "probe").await.map_err(unavailable)
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StorageError> {
        let guard = self.entries().await?;
        Ok(guard
            .as_ref()
            .and_then(|entries| entries.get(&entry_key(collection, key)))
            .cloned())
    }

    async fn set(&self, collection: &str, key: &str, value: &Value) -> Result<(), StorageError> {
        let entry = entry_key(collection, key);
        self.update(collection, |entries| {
            entries.insert(entry, value.clone());
            true
        })
        .await
        .map(|_| ())
    }

    async fn remove(&self, collection: &str, key: &str) -> Result<bool, StorageError> {
        let entry = entry_key(collection, key);
        self.update(collection, |entries| entries.remove(&entry).is_some())
            .await
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>, StorageError> {
        let prefix = format!("{}/", collection);
        let guard = self.entries().await?;
        let mut matching: Vec<(&String, &Value)> = guard
            .iter()
            .flat_map(|entries| entries.iter())
            .filter(|(k, _)| k.starts_with(&prefix))
            .collect();
        matching.sort_by(|a, b| a.0.cmp(b.0));
        Ok(matching.into_iter().map(|(_, v)| v.clone()).collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.update("*", |entries| {
            entries.clear();
            true
        })
        .await
        .map(|_| ())
    }
}
