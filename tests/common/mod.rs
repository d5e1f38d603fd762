//! Common test utilities for integration tests.
//!
//! ```ignore
//! let env = TestEnv::builder().streaming(true).build();
//! env.mock.set_response(MESSAGES_URL, reply("Hello"));
//! env.coordinator.create_new_chat().await;
//! ```

#![allow(dead_code)]

pub mod mocks;

pub use mocks::*;

use std::sync::{Arc, Mutex};

use insightwave::api::{ApiClient, ApiConfig, RetryPolicy};
use insightwave::chat::{ChatCoordinator, CoordinatorConfig, MarkdownRenderer};
use insightwave::events::{EventBus, Subscription};
use insightwave::models::Preferences;
use insightwave::services::PreferencesManager;
use insightwave::storage::StorageService;
use insightwave::store::{create_app_store, AppState, Store};

pub const BASE_URL: &str = "https://api.test";
pub const MESSAGES_URL: &str = "https://api.test/v1/messages";
pub const TEST_API_KEY: &str = "sk-test-key";

/// Retry policy with millisecond delays.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new()
        .with_base_delay(std::time::Duration::from_millis(1))
        .with_max_delay(std::time::Duration::from_millis(4))
        .with_jitter(false)
}

/// Topics seen by a wildcard subscriber, in emission order.
pub struct Recorder {
    topics: Arc<Mutex<Vec<String>>>,
    _subscription: Subscription,
}

impl Recorder {
    pub fn attach(bus: &EventBus) -> Self {
        let topics = Arc::new(Mutex::new(Vec::new()));
        let sink = topics.clone();
        let subscription = bus.subscribe_all(move |event| {
            sink.lock().unwrap().push(event.topic.clone());
            Ok(())
        });
        Self {
            topics,
            _subscription: subscription,
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().unwrap().clone()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.topics().iter().filter(|t| *t == topic).count()
    }

    /// Position of the first `topic`, if it was seen.
    pub fn position(&self, topic: &str) -> Option<usize> {
        self.topics().iter().position(|t| t == topic)
    }
}

/// A fully wired chat core over a mock HTTP client.
pub struct TestEnv {
    pub mock: MockHttpClient,
    pub bus: EventBus,
    pub store: Store<AppState>,
    pub storage: StorageService,
    pub api: Arc<ApiClient>,
    pub coordinator: ChatCoordinator,
}

impl TestEnv {
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::default()
    }

    pub fn preferences(&self) -> PreferencesManager {
        PreferencesManager::new(
            self.store.clone(),
            self.storage.clone(),
            self.bus.clone(),
            self.api.clone(),
        )
    }
}

pub struct TestEnvBuilder {
    streaming: bool,
    markdown: bool,
    api_key: Option<String>,
    storage: Option<StorageService>,
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self {
            streaming: false,
            markdown: false,
            api_key: Some(TEST_API_KEY.to_string()),
            storage: None,
        }
    }
}

impl TestEnvBuilder {
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn markdown(mut self, markdown: bool) -> Self {
        self.markdown = markdown;
        self
    }

    pub fn without_api_key(mut self) -> Self {
        self.api_key = None;
        self
    }

    pub fn storage(mut self, storage: StorageService) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn build(self) -> TestEnv {
        let mock = MockHttpClient::new();
        let bus = EventBus::new();
        let preferences = Preferences {
            streaming: self.streaming,
            markdown_enabled: self.markdown,
            ..Preferences::default()
        };
        let store = create_app_store(AppState::with_preferences(preferences), Some(bus.clone()));
        let storage = self.storage.unwrap_or_else(StorageService::memory);

        let mut config = ApiConfig::new().with_base_url(BASE_URL).with_retry(fast_retry());
        if let Some(key) = self.api_key {
            config = config.with_api_key(key);
        }
        let api = Arc::new(ApiClient::new(Arc::new(mock.clone()), config).with_bus(bus.clone()));

        let coordinator = ChatCoordinator::with_parts(
            store.clone(),
            storage.clone(),
            api.clone(),
            bus.clone(),
            Arc::new(MarkdownRenderer),
            CoordinatorConfig::default(),
        );

        TestEnv {
            mock,
            bus,
            store,
            storage,
            api,
            coordinator,
        }
    }
}
