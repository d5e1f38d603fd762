//! Topic-based event bus.
//!
//! Delivery is synchronous fan-out on the caller's task: `emit` invokes
//! every handler registered for the topic, then every wildcard handler.
//! A handler that returns an error or panics is logged and skipped; the
//! remaining handlers still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Topic names produced and consumed by the chat core.
pub mod topics {
    // Consumed by the chat coordinator
    pub const CHAT_NEW: &str = "chat:new";
    pub const CHAT_LOAD: &str = "chat:load";
    pub const CHAT_DELETE: &str = "chat:delete";
    pub const CHAT_SEND: &str = "chat:send";
    pub const MESSAGE_EDIT: &str = "message:edit";
    pub const MESSAGE_REGENERATE: &str = "message:regenerate";

    // API client lifecycle
    pub const API_REQUEST: &str = "api:request";
    pub const API_RESPONSE: &str = "api:response";
    pub const API_RETRY: &str = "api:retry";
    pub const API_ERROR: &str = "api:error";
    pub const API_STREAM_START: &str = "api:stream:start";
    pub const API_STREAM_CHUNK: &str = "api:stream:chunk";
    pub const API_STREAM_END: &str = "api:stream:end";
    pub const API_STREAM_ERROR: &str = "api:stream:error";

    // Assistant progress
    pub const ASSISTANT_THINKING: &str = "assistant:thinking";
    pub const ASSISTANT_STREAMING: &str = "assistant:streaming";
    pub const ASSISTANT_RESPONDED: &str = "assistant:responded";
    pub const ASSISTANT_ERROR: &str = "assistant:error";

    // Chat lifecycle
    pub const CHAT_CREATED: &str = "chat:created";
    pub const CHAT_LOADED: &str = "chat:loaded";
    pub const CHAT_DELETED: &str = "chat:deleted";
    pub const CHAT_SAVED: &str = "chat:saved";

    pub const STATE_CHANGED: &str = "state:changed";

    // Peripheral services
    pub const NETWORK_ONLINE: &str = "network:online";
    pub const NETWORK_OFFLINE: &str = "network:offline";
    pub const PREFERENCES_CHANGED: &str = "preferences:changed";
    pub const ERROR_REPORTED: &str = "error:reported";
    pub const ERROR_RECOVERY: &str = "error:recovery";
}

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by event handlers.
pub type HandlerResult = Result<(), HandlerError>;

type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// An emitted event as seen by handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub topic: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

struct Entry {
    id: u64,
    handler: Handler,
    once: bool,
}

#[derive(Default)]
struct Registry {
    topics: HashMap<String, Vec<Entry>>,
    wildcard: Vec<Entry>,
}

#[derive(Default)]
struct BusInner {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

impl BusInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, topic: Option<&str>, id: u64) -> bool {
        let mut registry = self.registry();
        let entries = match topic {
            Some(topic) => match registry.topics.get_mut(topic) {
                Some(entries) => entries,
                None => return false,
            },
            None => &mut registry.wildcard,
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if let Some(topic) = topic {
            if registry.topics.get(topic).is_some_and(|e| e.is_empty()) {
                registry.topics.remove(topic);
            }
        }
        removed
    }
}

/// Handle returned by the subscribe methods.
///
/// Dropping the handle keeps the subscription alive; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<BusInner>,
    topic: Option<String>,
    id: u64,
}

impl Subscription {
    /// Remove the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.remove(self.topic.as_deref(), self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusInner").finish_non_exhaustive()
    }
}

/// Publish/subscribe hub shared by all components.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events emitted under `topic`.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(Some(topic), Arc::new(handler), false)
    }

    /// Register a handler that receives every emitted event.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler), false)
    }

    /// Register a handler that is removed after its first invocation.
    pub fn once<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(Some(topic), Arc::new(handler), true)
    }

    fn register(&self, topic: Option<&str>, handler: Handler, once: bool) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Entry { id, handler, once };
        let mut registry = self.inner.registry();
        match topic {
            Some(topic) => registry
                .topics
                .entry(topic.to_string())
                .or_default()
                .push(entry),
            None => registry.wildcard.push(entry),
        }
        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic: topic.map(str::to_string),
            id,
        }
    }

    /// Deliver `payload` to the topic's handlers, then to wildcard handlers.
    ///
    /// Returns the number of handlers that failed.
    pub fn emit(&self, topic: &str, payload: Value) -> usize {
        let event = Event {
            topic: topic.to_string(),
            payload,
            timestamp: Utc::now(),
        };

        // Snapshot the handler set and drop once-handlers before invoking
        // anything, so handlers can freely subscribe or emit.
        let handlers: Vec<Handler> = {
            let mut registry = self.inner.registry();
            let mut selected = Vec::new();
            if let Some(entries) = registry.topics.get_mut(topic) {
                selected.extend(entries.iter().map(|e| e.handler.clone()));
                entries.retain(|e| !e.once);
                if entries.is_empty() {
                    registry.topics.remove(topic);
                }
            }
            selected.extend(registry.wildcard.iter().map(|e| e.handler.clone()));
            selected
        };

        let mut failures = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::error!("Event handler for '{}' failed: {}", topic, e);
                }
                Err(_) => {
                    failures += 1;
                    tracing::error!("Event handler for '{}' panicked", topic);
                }
            }
        }
        failures
    }

    /// Number of handlers registered for `topic` (wildcards excluded).
    pub fn handler_count(&self, topic: &str) -> usize {
        self.inner
            .registry()
            .topics
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Whether an `emit` on `topic` would reach any handler, wildcards
    /// included.
    pub fn has_listeners(&self, topic: &str) -> bool {
        let registry = self.inner.registry();
        !registry.wildcard.is_empty() || registry.topics.get(topic).is_some_and(|e| !e.is_empty())
    }

    /// Remove every handler.
    pub fn clear(&self) {
        let mut registry = self.inner.registry();
        registry.topics.clear();
        registry.wildcard.clear();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry();
        f.debug_struct("EventBus")
            .field("topics", &registry.topics.len())
            .field("wildcard", &registry.wildcard.len())
            .finish()
    }
}
