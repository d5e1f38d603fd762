//! Connectivity tracking.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;

use crate::api::ApiClient;
use crate::events::{topics, EventBus};
use crate::store::reducers::set_network_status_action;
use crate::store::{AppState, Store};

/// Tracks whether the API is reachable and publishes transitions.
///
/// Only changes are published: reporting the current status again is a
/// no-op.
pub struct NetworkMonitor {
    store: Store<AppState>,
    bus: EventBus,
    api: Arc<ApiClient>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMonitor {
    pub fn new(store: Store<AppState>, bus: EventBus, api: Arc<ApiClient>) -> Self {
        Self {
            store,
            bus,
            api,
            poller: Mutex::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        self.store.get_state().is_online()
    }

    /// Record an externally observed status. Returns whether it changed.
    pub fn set_online(&self, online: bool) -> bool {
        if self.is_online() == online {
            return false;
        }
        self.store.dispatch_plain(set_network_status_action(online));
        let topic = if online {
            tracing::info!("Network connection restored");
            topics::NETWORK_ONLINE
        } else {
            tracing::warn!("Network connection lost");
            topics::NETWORK_OFFLINE
        };
        self.bus.emit(
            topic,
            json!({ "online": online, "timestamp": chrono::Utc::now().timestamp_millis() }),
        );
        true
    }

    /// Probe the API host now and record the result.
    pub async fn check_now(&self) -> bool {
        let online = self.api.health_check().await;
        self.set_online(online);
        online
    }

    /// Poll every `interval` until [`NetworkMonitor::stop`] or drop.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(monitor) = weak.upgrade() else {
                    break;
                };
                monitor.check_now().await;
            }
        });
        if let Some(previous) = self.lock_poller().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.lock_poller().take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_poller()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn lock_poller(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.poller.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
