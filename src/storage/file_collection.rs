//! Structured backend: one directory per collection, one JSON file per
//! record.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;

use super::backend::{BackendKind, StorageBackend};
use crate::error::StorageError;

const PROBE_FILE: &str = ".probe";

/// Map a key or collection name onto a file name.
///
/// Percent-encoding keeps distinct names distinct. `%` alone never comes
/// out of the encoder, so it stands for the empty name.
pub(crate) fn file_stem(name: &str) -> String {
    if name.is_empty() {
        return "%".to_string();
    }
    urlencoding::encode(name).into_owned()
}

#[derive(Debug, Clone)]
pub struct FileCollectionStore {
    root: PathBuf,
    quota: Option<u64>,
}

impl FileCollectionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            quota: None,
        }
    }

    /// Limit the total size of all records.
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota = Some(bytes);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(file_stem(collection))
    }

    fn record_path(&self, collection: &str, key: &str) -> PathBuf {
        self.collection_dir(collection)
            .join(format!("{}.json", file_stem(key)))
    }

    async fn file_len(path: &Path) -> Result<u64, StorageError> {
        match fs::metadata(path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Bytes currently used by all records.
    pub async fn used_bytes(&self) -> Result<u64, StorageError> {
        let mut total = 0;
        let mut collections = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = collections.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let mut records = fs::read_dir(entry.path()).await?;
            while let Some(record) = records.next_entry().await? {
                total += record.metadata().await?.len();
            }
        }
        Ok(total)
    }

    async fn check_quota(
        &self,
        collection: &str,
        path: &Path,
        new_len: u64,
    ) -> Result<(), StorageError> {
        let Some(limit) = self.quota else {
            return Ok(());
        };
        let used = self.used_bytes().await?;
        let existing = Self::file_len(path).await?;
        let needed = used.saturating_sub(existing) + new_len;
        if needed > limit {
            return Err(StorageError::QuotaExceeded {
                collection: collection.to_string(),
                needed,
                limit,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileCollectionStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Structured
    }

    async fn probe(&self) -> Result<(), StorageError> {
        let unavailable = |e: std::io::Error| StorageError::Unavailable {
            backend: BackendKind::Structured.to_string(),
            message: format!("{}: {}", self.root.display(), e),
        };
        fs::create_dir_all(&self.root).await.map_err(unavailable)?;
        let probe = self.root.join(PROBE_FILE);
        fs::write(&probe, b"ok").await.map_err(unavailable)?;
        fs::remove_file(&probe).await.map_err(unavailable)?;
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StorageError> {
        let path = self.record_path(collection, key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, collection: &str, key: &str, value: &Value) -> Result<(), StorageError> {
        let path = self.record_path(collection, key);
        let data = serde_json::to_vec_pretty(value)?;
        self.check_quota(collection, &path, data.len() as u64).await?;

        fs::create_dir_all(self.collection_dir(collection)).await?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, collection: &str, key: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.record_path(collection, key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>, StorageError> {
        let mut dir = match fs::read_dir(self.collection_dir(collection)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut paths = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice(&bytes) {
                Ok(value) => records.push(value),
                Err(e) => tracing::warn!("Skipping unreadable record {:?}: {}", path, e),
            }
        }
        Ok(records)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(entry.path()).await?;
            } else {
                fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_file_stem_escapes_separators() {
        assert_eq!(file_stem("chat_1_abc"), "chat_1_abc");
        assert_eq!(file_stem("../etc/passwd"), "..%2Fetc%2Fpasswd");
        assert_eq!(file_stem(""), "%");
    }

    #[test]
    fn test_file_stem_keeps_names_distinct() {
        let names = ["a.b", "a_b", "a/b", "a b", "a%2Fb", "_", ""];
        let stems: std::collections::HashSet<String> = names.iter().map(|n| file_stem(n)).collect();
        assert_eq!(stems.len(), names.len());
    }

    #[tokio::test]
    async fn test_similar_keys_do_not_overwrite_each_other() {
        let dir = TempDir::new().unwrap();
        let store = FileCollectionStore::new(dir.path());
        store.set("chats", "a.b", &json!({"id": "a.b"})).await.unwrap();
        store.set("chats", "a_b", &json!({"id": "a_b"})).await.unwrap();
        store.set("chats", "a/b", &json!({"id": "a/b"})).await.unwrap();

        assert_eq!(store.get("chats", "a.b").await.unwrap(), Some(json!({"id": "a.b"})));
        assert_eq!(store.get("chats", "a_b").await.unwrap(), Some(json!({"id": "a_b"})));
        assert_eq!(store.get("chats", "a/b").await.unwrap(), Some(json!({"id": "a/b"})));
        assert_eq!(store.get_all("chats").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileCollectionStore::new(dir.path());
        store.probe().await.unwrap();

        store
            .set("chats", "chat_1", &json!({"id": "chat_1", "title": "A"}))
            .await
            .unwrap();
        assert!(dir.path().join("chats").join("chat_1.json").exists());
        assert_eq!(
            store.get("chats", "chat_1").await.unwrap(),
            Some(json!({"id": "chat_1", "title": "A"}))
        );
        assert!(store.remove("chats", "chat_1").await.unwrap());
        assert!(!store.remove("chats", "chat_1").await.unwrap());
        assert_eq!(store.get("chats", "chat_1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_all_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = FileCollectionStore::new(dir.path());
        store.set("chats", "b", &json!({"id": "b"})).await.unwrap();
        store.set("chats", "a", &json!({"id": "a"})).await.unwrap();
        store.set("keyValue", "x", &json!(1)).await.unwrap();

        let all = store.get_all("chats").await.unwrap();
        assert_eq!(all, vec![json!({"id": "a"}), json!({"id": "b"})]);
        assert!(store.get_all("missing").await.unwrap().is_empty());

        store.clear().await.unwrap();
        assert!(store.get_all("chats").await.unwrap().is_empty());
        assert_eq!(store.get("keyValue", "x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let dir = TempDir::new().unwrap();
        let store = FileCollectionStore::new(dir.path()).with_quota(64);
        store.set("chats", "small", &json!({"id": "s"})).await.unwrap();

        let big = json!({"id": "big", "body": "x".repeat(100)});
        let err = store.set("chats", "big", &big).await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(store.get("chats", "big").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_probe_fails_when_root_is_a_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, "x").unwrap();

        let store = FileCollectionStore::new(&file);
        let err = store.probe().await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { .. }));
    }
}
