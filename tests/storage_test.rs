//! Tier selection, on-disk round trips and quota recovery.

mod common;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde_json::json;

use common::*;
use insightwave::models::{Chat, Message};
use insightwave::storage::{
    collections, BackendKind, FileKeyValueStore, StorageBackend, StorageConfig, StorageMode,
    StorageService, LAST_ACTIVE_CHAT_KEY,
};

fn dated_chat(index: i64) -> Chat {
    let mut chat = Chat::with_id(format!("chat_{:02}", index));
    chat.title = format!("Chat {}", index);
    chat.created_at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    chat.updated_at = chat.created_at + ChronoDuration::minutes(index);
    chat.messages.push(Message::human(format!("message {}", index), Vec::new()));
    chat
}

#[tokio::test]
async fn test_auto_mode_prefers_structured_files() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageService::initialize(&StorageConfig::new(dir.path())).await;
    assert_eq!(storage.backend_kind(), BackendKind::Structured);

    assert!(storage.save_chat(&dated_chat(1)).await);
    assert!(dir.path().join("collections").join("chats").is_dir());
}

#[tokio::test]
async fn test_key_value_mode_uses_single_document() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig::new(dir.path()).with_mode(StorageMode::KeyValue);
    let storage = StorageService::initialize(&config).await;
    assert_eq!(storage.backend_kind(), BackendKind::Simple);

    storage.save_chat(&dated_chat(1)).await;
    storage.set(LAST_ACTIVE_CHAT_KEY, json!("chat_01")).await;

    let reopened = StorageService::initialize(&config).await;
    assert_eq!(reopened.load_chats().await.len(), 1);
    assert_eq!(reopened.get(LAST_ACTIVE_CHAT_KEY).await, Some(json!("chat_01")));
}

#[tokio::test]
async fn test_unusable_data_dir_falls_back_to_memory() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"occupied").unwrap();

    let storage = StorageService::initialize(&StorageConfig::new(&blocker)).await;
    assert_eq!(storage.backend_kind(), BackendKind::Memory);
    assert!(storage.save_chat(&dated_chat(1)).await);
    assert_eq!(storage.load_chats().await.len(), 1);
}

#[tokio::test]
async fn test_corrupt_document_is_skipped_in_key_value_mode() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("store.json"), b"{ not json").unwrap();

    let config = StorageConfig::new(dir.path()).with_mode(StorageMode::KeyValue);
    let storage = StorageService::initialize(&config).await;
    assert_eq!(storage.backend_kind(), BackendKind::Memory);
}

#[tokio::test]
async fn test_chat_round_trip_preserves_messages() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageService::initialize(&StorageConfig::new(dir.path())).await;

    let mut chat = dated_chat(3);
    chat.dirty = true;
    let mut reply = Message::assistant("<p><strong>hi</strong></p>\n", Some("claude-test".into()));
    reply.raw_content = Some("**hi**".into());
    // Timestamps persist at millisecond precision.
    reply.timestamp = chat.updated_at;
    chat.messages.push(reply.clone());
    storage.save_chat(&chat).await;

    let loaded = storage.load_chats().await;
    assert_eq!(loaded.len(), 1);
    assert!(!loaded[0].dirty);
    assert_eq!(loaded[0].messages[1], reply);
    assert_eq!(loaded[0].updated_at, chat.updated_at);
}

#[tokio::test]
async fn test_quota_error_evicts_to_newest_ten() {
    let faulty = Arc::new(FaultyStore::in_memory());
    let storage = StorageService::with_backend(faulty.clone());
    for i in 1..=15 {
        assert!(storage.save_chat(&dated_chat(i)).await);
    }

    faulty.fail_next_writes(1);
    assert!(storage.save_chat(&dated_chat(16)).await);

    let mut ids: Vec<String> = storage.load_chats().await.into_iter().map(|c| c.id).collect();
    ids.sort();
    let expected: Vec<String> = (6..=16).map(|i| format!("chat_{:02}", i)).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_quota_error_during_chat_creation() {
    let faulty = Arc::new(FaultyStore::in_memory());
    let storage = StorageService::with_backend(faulty.clone());
    for i in 1..=15 {
        storage.save_chat(&dated_chat(i)).await;
    }

    let env = TestEnv::builder().storage(storage.clone()).build();
    env.coordinator.initialize().await;
    faulty.fail_next_writes(1);
    let created = env.coordinator.create_new_chat().await;

    let saved = storage.load_chats().await;
    assert_eq!(saved.len(), 11);
    assert_eq!(saved[0].id, created.id);
    assert_eq!(storage.get(LAST_ACTIVE_CHAT_KEY).await, Some(json!(created.id)));
}

#[tokio::test]
async fn test_persistent_write_failure_is_not_raised() {
    let faulty = Arc::new(FaultyStore::in_memory());
    let storage = StorageService::with_backend(faulty.clone());
    faulty.fail_next_writes(2);

    assert!(!storage.save_chat(&dated_chat(1)).await);
    assert!(storage.load_chats().await.is_empty());
    assert_eq!(faulty.write_attempts(), 2);
}

#[tokio::test]
async fn test_small_quota_file_store_reports_failure() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FileKeyValueStore::new(dir.path().join("store.json")).with_quota(64);
    let err = backend
        .set(collections::CHATS, "chat_01", &serde_json::to_value(dated_chat(1)).unwrap())
        .await
        .unwrap_err();
    assert!(err.is_quota_exceeded());

    let storage = StorageService::with_backend(Arc::new(backend));
    assert!(!storage.save_chat(&dated_chat(1)).await);
    assert!(storage.set(LAST_ACTIVE_CHAT_KEY, json!("x")).await);
}
