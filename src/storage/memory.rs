//! In-memory backend, the last tier.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::backend::{BackendKind, StorageBackend};
use crate::error::StorageError;

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Collections) -> R) -> R {
        let mut guard = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn probe(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.with(|c| c.get(collection).and_then(|records| records.get(key)).cloned()))
    }

    async fn set(&self, collection: &str, key: &str, value: &Value) -> Result<(), StorageError> {
        self.with(|c| {
            c.entry(collection.to_string())
                .or_default()
                .insert(key.to_string(), value.clone());
        });
        Ok(())
    }

    async fn remove(&self, collection: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self.with(|c| {
            c.get_mut(collection)
                .map(|records| records.remove(key).is_some())
                .unwrap_or(false)
        }))
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>, StorageError> {
        Ok(self.with(|c| {
            c.get(collection)
                .map(|records| records.values().cloned().collect())
                .unwrap_or_default()
        }))
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.with(|c| c.clear());
        Ok(())
    }
}
