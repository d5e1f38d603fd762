//! Storage backend seam.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;

/// Which tier a backend belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// One file per record, grouped by collection.
    Structured,
    /// A single key-value document.
    Simple,
    /// Process memory; nothing survives a restart.
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Structured => "structured",
            BackendKind::Simple => "simple",
            BackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record storage addressed by `(collection, key)`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Check that the backend works in this environment.
    async fn probe(&self) -> Result<(), StorageError>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set(&self, collection: &str, key: &str, value: &Value) -> Result<(), StorageError>;

    /// Returns whether a record was removed.
    async fn remove(&self, collection: &str, key: &str) -> Result<bool, StorageError>;

    /// Every record of a collection, in key order.
    async fn get_all(&self, collection: &str) -> Result<Vec<Value>, StorageError>;

    /// Drop every collection.
    async fn clear(&self) -> Result<(), StorageError>;
}
