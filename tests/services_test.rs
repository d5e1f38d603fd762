//! Preferences, connectivity and error reporting wired to the chat core.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::*;
use insightwave::chat::SendOptions;
use insightwave::events::topics;
use insightwave::services::{BoundaryConfig, ErrorBoundary, NetworkMonitor};
use insightwave::storage::{StorageConfig, StorageService};

async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn test_preferences_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig::new(dir.path());

    let env = TestEnv::builder()
        .storage(StorageService::initialize(&config).await)
        .build();
    let preferences = env.preferences();
    preferences.load().await;
    preferences
        .update(json!({"model": "claude-other", "temperature": 0.2, "fontSize": 14}))
        .await;

    let restarted = TestEnv::builder()
        .storage(StorageService::initialize(&config).await)
        .build();
    let loaded = restarted.preferences().load().await;
    assert_eq!(loaded.model, "claude-other");
    assert_eq!(loaded.temperature, 0.2);
    assert_eq!(loaded.extra.get("fontSize"), Some(&json!(14)));
    assert_eq!(restarted.api.model(), "claude-other");
}

#[tokio::test]
async fn test_api_key_from_preferences_enables_sending() {
    let env = TestEnv::builder().without_api_key().build();
    env.mock.set_response(MESSAGES_URL, reply("hello"));
    env.coordinator.create_new_chat().await;
    assert!(env
        .coordinator
        .send_message("hi", SendOptions::default())
        .await
        .is_err());

    let recorder = Recorder::attach(&env.bus);
    env.preferences().update(json!({"apiKey": "sk-saved"})).await;
    assert!(env.api.has_api_key());
    assert_eq!(recorder.count(topics::PREFERENCES_CHANGED), 1);

    env.coordinator.send_message("hi", SendOptions::default()).await.unwrap();
    let request = &env.mock.get_requests()[0];
    assert_eq!(request.headers["x-api-key"], "sk-saved");
}

#[tokio::test]
async fn test_preferences_drive_request_options() {
    let env = TestEnv::builder().build();
    env.mock.set_response(MESSAGES_URL, reply("ok"));
    env.preferences()
        .update(json!({
            "model": "claude-custom",
            "maxTokens": 8192,
            "systemPrompt": "Answer in French.",
            "thinkingEnabled": true,
            "thinkingBudget": 2048
        }))
        .await;
    env.coordinator.create_new_chat().await;
    env.coordinator.send_message("hi", SendOptions::default()).await.unwrap();

    let body = env.mock.get_requests()[0].json_body().unwrap();
    assert_eq!(body["model"], "claude-custom");
    assert_eq!(body["max_tokens"], 8192);
    assert_eq!(body["system"], "Answer in French.");
    assert_eq!(body["thinking"]["budget_tokens"], 2048);
    assert!(body.get("temperature").is_none());
}

#[tokio::test]
async fn test_network_transitions_are_published_once() {
    let env = TestEnv::builder().build();
    let recorder = Recorder::attach(&env.bus);
    let monitor = Arc::new(NetworkMonitor::new(
        env.store.clone(),
        env.bus.clone(),
        env.api.clone(),
    ));

    // Nothing answers the base URL yet.
    assert!(!monitor.check_now().await);
    assert!(!monitor.check_now().await);
    assert_eq!(recorder.count(topics::NETWORK_OFFLINE), 1);
    assert!(!env.store.get_state().is_online());

    env.mock.set_response(BASE_URL, MockResponse::status(200, "ok"));
    monitor.start(Duration::from_millis(10));
    assert!(wait_for(|| monitor.is_online()).await);
    assert_eq!(recorder.count(topics::NETWORK_ONLINE), 1);

    monitor.stop();
    assert!(!monitor.is_running());
}

#[tokio::test]
async fn test_repeated_failures_enter_recovery_mode() {
    let env = TestEnv::builder().build();
    env.mock
        .set_response(MESSAGES_URL, MockResponse::status(401, "invalid key"));
    let boundary = ErrorBoundary::new(
        env.store.clone(),
        env.bus.clone(),
        BoundaryConfig {
            max_errors: 2,
            window: Duration::from_secs(60),
        },
    );
    let recorder = Recorder::attach(&env.bus);
    env.coordinator.create_new_chat().await;

    let mut tripped = Vec::new();
    for attempt in 0..3 {
        let result = boundary
            .guard(
                "chat",
                env.coordinator
                    .send_message(&format!("try {}", attempt), SendOptions::default()),
            )
            .await;
        assert!(result.is_none());
        tripped.push(env.store.get_state().recovery_mode);
    }
    assert_eq!(tripped, vec![false, false, true]);
    assert_eq!(recorder.count(topics::ERROR_REPORTED), 3);
    assert_eq!(recorder.count(topics::ERROR_RECOVERY), 1);

    let chat_id = env.coordinator.current_chat().unwrap().id.clone();
    boundary.reset_state();
    let state = env.store.get_state();
    assert!(!state.recovery_mode);
    assert!(state.errors.is_empty());
    assert_eq!(state.current_chat_id.as_deref(), Some(chat_id.as_str()));
    assert_eq!(boundary.recent_error_count(), 0);
}

#[tokio::test]
async fn test_bus_commands_drive_coordinator() {
    let env = TestEnv::builder().build();
    env.mock.set_response(MESSAGES_URL, reply("from the bus"));
    env.coordinator.attach(&env.bus);
    let recorder = Recorder::attach(&env.bus);

    env.bus.emit(topics::CHAT_NEW, json!({}));
    assert!(wait_for(|| recorder.count(topics::CHAT_CREATED) == 1).await);

    env.bus.emit(topics::CHAT_SEND, json!({"content": "hello"}));
    assert!(wait_for(|| recorder.count(topics::ASSISTANT_RESPONDED) == 1).await);
    let chat = env.coordinator.current_chat().unwrap();
    assert_eq!(chat.messages[1].content, "from the bus");

    // Malformed commands are logged on their task and change nothing.
    assert_eq!(env.bus.emit(topics::CHAT_LOAD, json!({})), 0);
    assert_eq!(env.bus.emit(topics::CHAT_SEND, json!({"files": "nope"})), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(env.coordinator.current_chat().unwrap().messages.len(), 2);

    env.bus.emit(topics::CHAT_DELETE, json!({"chatId": chat.id}));
    assert!(wait_for(|| recorder.count(topics::CHAT_DELETED) == 1).await);
    assert!(env.store.get_state().chat(&chat.id).is_none());

    env.coordinator.shutdown().await;
}
