//! Backend wrapper that injects failures, for testing quota recovery and
//! tier fallback.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::backend::{BackendKind, StorageBackend};
use super::memory::MemoryStore;
use crate::error::StorageError;

pub struct FaultyStore {
    inner: Arc<dyn StorageBackend>,
    kind: BackendKind,
    failing_writes: AtomicUsize,
    unavailable: AtomicBool,
    writes: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        let kind = inner.kind();
        Self {
            inner,
            kind,
            failing_writes: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Wraps a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Report `kind` instead of the wrapped backend's kind.
    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    /// Make `probe` fail.
    pub fn unavailable(self) -> Self {
        self.unavailable.store(true, Ordering::SeqCst);
        self
    }

    /// Fail the next `count` writes with `QuotaExceeded`.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Writes attempted so far, failed ones included.
    pub fn write_attempts(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StorageBackend for FaultyStore {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn probe(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                backend: self.kind.to_string(),
                message: "disabled for test".to_string(),
            });
        }
        self.inner.probe().await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StorageError> {
        self.inner.get(collection, key).await
    }

    async fn set(&self, collection: &str, key: &str, value: &Value) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(StorageError::QuotaExceeded {
                collection: collection.to_string(),
                needed: 1,
                limit: 0,
            });
        }
        self.inner.set(collection, key, value).await
    }

    async fn remove(&self, collection: &str, key: &str) -> Result<bool, StorageError> {
        self.inner.remove(collection, key).await
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>, StorageError> {
        self.inner.get_all(collection).await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.inner.clear().await
    }
}
