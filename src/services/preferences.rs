use std::sync::Arc;

use serde_json::{json, Value};

use crate::api::ApiClient;
use crate::events::{topics, EventBus};
use crate::models::Preferences;
use crate::storage::{collections, StorageService, PREFERENCES_KEY};
use crate::store::reducers::set_preferences_action;
use crate::store::{AppState, Store};

/// Loads, updates and persists [`Preferences`], keeping the API client's
/// key and model in step with them.
pub struct PreferencesManager {
    store: Store<AppState>,
    storage: StorageService,
    bus: EventBus,
    api: Arc<ApiClient>,
}

impl PreferencesManager {
    pub fn new(
        store: Store<AppState>,
        storage: StorageService,
        bus: EventBus,
        api: Arc<ApiClient>,
    ) -> Self {
        Self {
            store,
            storage,
            bus,
            api,
        }
    }

    /// Merge the saved record over the defaults and publish the result.
    ///
    /// A key configured on the client survives when none was saved.
    pub async fn load(&self) -> Preferences {
        let mut saved = self
            .storage
            .get_item(PREFERENCES_KEY, collections::PREFERENCES)
            .await
            .unwrap_or_else(|| json!({}));
        if let Some(record) = saved.as_object_mut() {
            record.remove("id");
        }
        let mut preferences = Preferences::from_saved(&saved);
        if !preferences.has_api_key() {
            if let Some(key) = self.api.config().api_key {
                preferences.api_key = key;
            }
        }

        let value = serde_json::to_value(&preferences).unwrap_or_else(|_| json!({}));
        self.store.dispatch_plain(set_preferences_action(value));
        let preferences = self.current();
        self.sync_client(&preferences);
        tracing::debug!("Preferences loaded (model {})", preferences.model);
        preferences
    }

    /// Apply a partial update, persist it and announce what changed.
    pub async fn update(&self, partial: Value) -> Preferences {
        let before = self.current();
        self.store.dispatch_plain(set_preferences_action(partial.clone()));
        let after = self.current();
        if after == before {
            return after;
        }

        self.persist(&after).await;
        self.sync_client(&after);
        self.bus.emit(
            topics::PREFERENCES_CHANGED,
            json!({
                "changed": partial,
                "preferences": redacted(&after),
            }),
        );
        after
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get_state().preferences.get(key)
    }

    pub fn current(&self) -> Preferences {
        self.store.get_state().preferences.clone()
    }

    /// Restore the default schema values. The API key is kept.
    pub async fn reset(&self) -> Preferences {
        let defaults = Preferences {
            api_key: self.current().api_key,
            ..Preferences::default()
        };
        let value = serde_json::to_value(&defaults).unwrap_or_else(|_| json!({}));
        self.update(value).await
    }

    async fn persist(&self, preferences: &Preferences) {
        if !self
            .storage
            .set_json(PREFERENCES_KEY, preferences, collections::PREFERENCES)
            .await
        {
            tracing::warn!("Preferences were not saved");
        }
    }

    fn sync_client(&self, preferences: &Preferences) {
        if preferences.has_api_key() {
            self.api.set_api_key(&preferences.api_key);
        }
        self.api.set_model(&preferences.model);
    }
}

/// Preferences as published on the bus, without the API key.
fn redacted(preferences: &Preferences) -> Value {
    let mut value = serde_json::to_value(preferences).unwrap_or_else(|_| json!({}));
    if let Some(map) = value.as_object_mut() {
        map.insert("apiKey".to_string(), json!(preferences.has_api_key()));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockHttpClient;
    use crate::api::ApiConfig;
    use crate::store::create_app_store;
    use std::sync::Mutex;

    fn manager(storage: StorageService) -> (PreferencesManager, Arc<ApiClient>, EventBus) {
        let bus = EventBus::new();
        let store = create_app_store(AppState::default(), None);
        let api = Arc::new(ApiClient::new(Arc::new(MockHttpClient::new()), ApiConfig::new()));
        (
            PreferencesManager::new(store, storage, bus.clone(), api.clone()),
            api,
            bus,
        )
    }

    #[tokio::test]
    async fn test_load_merges_saved_over_defaults() {
        let storage = StorageService::memory();
        storage
            .set_item(
                PREFERENCES_KEY,
                json!({"model": "claude-saved", "apiKey": "sk-saved"}),
                collections::PREFERENCES,
            )
            .await;
        let (manager, api, _bus) = manager(storage);

        let prefs = manager.load().await;
        assert_eq!(prefs.model, "claude-saved");
        assert_eq!(prefs.max_tokens, 4096);
        assert!(!prefs.extra.contains_key("id"));
        assert_eq!(api.model(), "claude-saved");
        assert!(api.has_api_key());
    }

    #[tokio::test]
    async fn test_update_persists_and_emits() {
        let storage = StorageService::memory();
        let (manager, _api, bus) = manager(storage.clone());
        manager.load().await;

        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        bus.subscribe(topics::PREFERENCES_CHANGED, move |event| {
            e.lock().unwrap().push(event.payload.clone());
            Ok(())
        });

        let prefs = manager
            .update(json!({"theme": "dark", "apiKey": "sk-new"}))
            .await;
        assert_eq!(prefs.theme, "dark");
        assert_eq!(manager.get("theme"), Some(json!("dark")));

        let saved = storage
            .get_item(PREFERENCES_KEY, collections::PREFERENCES)
            .await
            .unwrap();
        assert_eq!(saved["theme"], "dark");

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["changed"]["theme"], "dark");
        assert_eq!(events[0]["preferences"]["apiKey"], true);
    }

    #[tokio::test]
    async fn test_noop_update_is_silent() {
        let (manager, _api, bus) = manager(StorageService::memory());
        manager.load().await;
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        bus.subscribe(topics::PREFERENCES_CHANGED, move |_| {
            *c.lock().unwrap() += 1;
            Ok(())
        });
        manager.update(json!({"theme": "system"})).await;
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_keeps_api_key() {
        let (manager, _api, _bus) = manager(StorageService::memory());
        manager.load().await;
        manager
            .update(json!({"apiKey": "sk-live", "temperature": 0.1, "theme": "dark"}))
            .await;

        let prefs = manager.reset().await;
        assert_eq!(prefs.api_key, "sk-live");
        assert_eq!(prefs.temperature, 0.7);
        assert_eq!(prefs.theme, "system");
    }

    #[tokio::test]
    async fn test_client_key_survives_empty_saved_record() {
        let bus = EventBus::new();
        let store = create_app_store(AppState::default(), None);
        let api = Arc::new(ApiClient::new(
            Arc::new(MockHttpClient::new()),
            ApiConfig::new().with_api_key("sk-env"),
        ));
        let manager = PreferencesManager::new(store, StorageService::memory(), bus, api.clone());

        let prefs = manager.load().await;
        assert_eq!(prefs.api_key, "sk-env");
        assert!(api.has_api_key());
    }
}
