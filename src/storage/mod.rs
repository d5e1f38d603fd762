//! Persistence.
//!
//! [`StorageService`] picks the first working backend for the session:
//!
//! 1. [`FileCollectionStore`] - a directory per collection, a file per record
//! 2. [`FileKeyValueStore`] - one JSON document
//! 3. [`MemoryStore`] - nothing persists
//!
//! Layout: `chats` (one record per chat), `preferences`
//! (`userPreferences`), `keyValue` (`lastActiveChatId`).

pub mod backend;
pub mod file_collection;
pub mod file_kv;
pub mod memory;
pub mod mock;
pub mod service;

pub use backend::{BackendKind, StorageBackend};
pub use file_collection::FileCollectionStore;
pub use file_kv::FileKeyValueStore;
pub use memory::MemoryStore;
pub use service::{
    collections, StorageConfig, StorageMode, StorageService, CHATS_KEPT_ON_QUOTA,
    LAST_ACTIVE_CHAT_KEY, PREFERENCES_KEY,
};
