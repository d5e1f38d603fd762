//! Centralized application state.
//!
//! A [`Store`] holds an immutable snapshot behind an `Arc`. Plain actions
//! pass through the middleware chain, select a reducer by their `type`
//! and replace the snapshot with the reducer's output. Subscribers watch a
//! [`Selector`] projection and are notified in batches when it changes.
//!
//! Lock order is `core → listeners → queue`. No lock is held while a
//! subscriber callback, an effect or an event handler runs; reducers,
//! middleware and selector functions do run under the core lock and must
//! not call back into the store.

pub mod action;
pub mod middleware;
pub mod reducers;
pub mod selector;
pub mod state;

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::events::{topics, EventBus};

pub use action::{Action, PlainAction, Thunk};
pub use middleware::Middleware;
pub use selector::{resolve_path, shallow_equal, Selector};
pub use state::{AppState, ErrorRecord, NetworkStatus, StreamingState};

/// Reducer used when no reducer is registered for an action's type.
pub const DEFAULT_REDUCER: &str = "DEFAULT";

/// Pure state transition.
pub type Reducer<S> = Arc<dyn Fn(&S, &Value) -> S + Send + Sync>;

type Callback = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Outcome of [`Store::dispatch`].
#[derive(Debug, Clone)]
pub enum Dispatched<S> {
    /// A plain action ran; the snapshot after it.
    Snapshot(Arc<S>),
    /// An effect ran; the value it resolved to.
    Effect(Value),
}

impl<S> Dispatched<S> {
    pub fn snapshot(self) -> Option<Arc<S>> {
        match self {
            Dispatched::Snapshot(s) => Some(s),
            Dispatched::Effect(_) => None,
        }
    }

    pub fn value(self) -> Option<Value> {
        match self {
            Dispatched::Effect(v) => Some(v),
            Dispatched::Snapshot(_) => None,
        }
    }
}

struct Core<S> {
    state: Arc<S>,
    reducers: HashMap<String, Reducer<S>>,
    middleware: Vec<Middleware<S>>,
}

struct Listener<S> {
    id: u64,
    selector: Selector<S>,
    callback: Callback,
    last: Value,
}

struct Pending {
    current: Value,
    previous: Value,
}

#[derive(Default)]
struct Queue {
    entries: BTreeMap<u64, Pending>,
    scheduled: bool,
}

struct StoreInner<S> {
    core: Mutex<Core<S>>,
    listeners: Mutex<Vec<Listener<S>>>,
    queue: Mutex<Queue>,
    bus: Option<EventBus>,
    next_id: AtomicU64,
}

/// Shared handle to a store. Cloning is cheap.
pub struct Store<S> {
    inner: Arc<StoreInner<S>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Handle returned by [`Store::subscribe`].
pub struct StoreSubscription<S> {
    store: Weak<StoreInner<S>>,
    id: u64,
}

impl<S> StoreSubscription<S> {
    /// Stop notifications, including any already queued.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.store.upgrade() else {
            return false;
        };
        let removed = {
            let mut listeners = lock(&inner.listeners);
            let before = listeners.len();
            listeners.retain(|l| l.id != self.id);
            listeners.len() != before
        };
        lock(&inner.queue).entries.remove(&self.id);
        removed
    }
}

/// Configures a [`Store`] before it is shared.
pub struct StoreBuilder<S> {
    initial: S,
    reducers: HashMap<String, Reducer<S>>,
    middleware: Vec<Middleware<S>>,
    bus: Option<EventBus>,
}

impl<S> StoreBuilder<S>
where
    S: Serialize + PartialEq + Send + Sync + 'static,
{
    pub fn reducer<F>(mut self, action_type: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(&S, &Value) -> S + Send + Sync + 'static,
    {
        self.reducers.insert(action_type.into(), Arc::new(reducer));
        self
    }

    pub fn middleware(mut self, middleware: Middleware<S>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Emit `state:changed` on `bus` for every dispatch that changes state.
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> Store<S> {
        Store {
            inner: Arc::new(StoreInner {
                core: Mutex::new(Core {
                    state: Arc::new(self.initial),
                    reducers: self.reducers,
                    middleware: self.middleware,
                }),
                listeners: Mutex::new(Vec::new()),
                queue: Mutex::new(Queue::default()),
                bus: self.bus,
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

impl<S> Store<S>
where
    S: Serialize + PartialEq + Send + Sync + 'static,
{
    pub fn builder(initial: S) -> StoreBuilder<S> {
        StoreBuilder {
            initial,
            reducers: HashMap::new(),
            middleware: Vec::new(),
            bus: None,
        }
    }

    /// A store with no reducers or middleware.
    pub fn new(initial: S) -> Self {
        Self::builder(initial).build()
    }

    /// Current snapshot.
    pub fn get_state(&self) -> Arc<S> {
        lock(&self.inner.core).state.clone()
    }

    /// Dispatch a plain action or run an effect.
    ///
    /// Effects receive a clone of this handle and run without any store
    /// lock held, so they may dispatch further actions.
    pub async fn dispatch(&self, action: impl Into<Action<S>>) -> Result<Dispatched<S>, AppError> {
        match action.into() {
            Action::Plain(action) => Ok(Dispatched::Snapshot(self.dispatch_plain(action))),
            Action::Effect(thunk) => thunk(self.clone()).await.map(Dispatched::Effect),
        }
    }

    /// Run a plain action through middleware and its reducer.
    ///
    /// An action without a type is dropped. An action whose type has no
    /// reducer falls back to `DEFAULT`, and is otherwise a no-op.
    pub fn dispatch_plain(&self, action: PlainAction) -> Arc<S> {
        let (prev, next, action) = {
            let mut core = lock(&self.inner.core);
            let mut action = action;
            for mw in &core.middleware {
                action = mw(action, &core.state);
            }

            let Some(action_type) = action.action_type.as_deref() else {
                tracing::warn!("Dropping action without a type");
                return core.state.clone();
            };
            let reducer = core
                .reducers
                .get(action_type)
                .or_else(|| core.reducers.get(DEFAULT_REDUCER))
                .cloned();
            let Some(reducer) = reducer else {
                tracing::debug!("No reducer for action '{}'", action_type);
                return core.state.clone();
            };

            let prev = core.state.clone();
            let next = reducer(&prev, &action.payload);
            if next == *prev {
                return prev;
            }
            let next = Arc::new(next);
            core.state = next.clone();
            self.collect_notifications(&next);
            (prev, next, action)
        };

        self.emit_state_changed(&action, &prev, &next);
        self.schedule_flush();
        next
    }

    /// Watch a projection of the state.
    ///
    /// `callback(new, prev)` runs on flush whenever the projection is no
    /// longer shallow-equal to the last value delivered.
    pub fn subscribe<F>(&self, selector: impl Into<Selector<S>>, callback: F) -> StoreSubscription<S>
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        let selector = selector.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let core = lock(&self.inner.core);
        let last = selector.project(&core.state, &mut None);
        lock(&self.inner.listeners).push(Listener {
            id,
            selector,
            callback: Arc::new(callback),
            last,
        });
        drop(core);
        StoreSubscription {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    /// Deliver queued notifications now. Returns how many callbacks ran.
    pub fn flush(&self) -> usize {
        let pending = {
            let mut queue = lock(&self.inner.queue);
            queue.scheduled = false;
            std::mem::take(&mut queue.entries)
        };
        if pending.is_empty() {
            return 0;
        }

        let callbacks: HashMap<u64, Callback> = lock(&self.inner.listeners)
            .iter()
            .filter(|l| pending.contains_key(&l.id))
            .map(|l| (l.id, l.callback.clone()))
            .collect();

        let mut delivered = 0;
        for (id, notification) in pending {
            if shallow_equal(&notification.current, &notification.previous) {
                continue;
            }
            let Some(callback) = callbacks.get(&id) else {
                continue;
            };
            match catch_unwind(AssertUnwindSafe(|| {
                callback(&notification.current, &notification.previous)
            })) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::error!("State listener {} panicked", id),
            }
        }
        delivered
    }

    fn collect_notifications(&self, next: &S) {
        let mut serialized = None;
        let mut listeners = lock(&self.inner.listeners);
        let mut queue = lock(&self.inner.queue);
        for listener in listeners.iter_mut() {
            let value = listener.selector.project(next, &mut serialized);
            if shallow_equal(&value, &listener.last) {
                continue;
            }
            let previous = std::mem::replace(&mut listener.last, value.clone());
            queue
                .entries
                .entry(listener.id)
                .and_modify(|p| p.current = value.clone())
                .or_insert(Pending {
                    current: value,
                    previous,
                });
        }
    }

    fn schedule_flush(&self) {
        {
            let mut queue = lock(&self.inner.queue);
            if queue.entries.is_empty() || queue.scheduled {
                return;
            }
            queue.scheduled = true;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let weak = Arc::downgrade(&self.inner);
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    if let Some(inner) = weak.upgrade() {
                        Store { inner }.flush();
                    }
                });
            }
            Err(_) => {
                self.flush();
            }
        }
    }

    fn emit_state_changed(&self, action: &PlainAction, prev: &S, next: &S) {
        let Some(bus) = &self.inner.bus else {
            return;
        };
        // Both snapshots are serialized in full; skip that when nobody listens.
        if !bus.has_listeners(topics::STATE_CHANGED) {
            return;
        }
        let payload = json!({
            "type": action.action_type,
            "payload": action.payload,
            "prevState": serde_json::to_value(prev).unwrap_or(Value::Null),
            "currentState": serde_json::to_value(next).unwrap_or(Value::Null),
        });
        bus.emit(topics::STATE_CHANGED, payload);
    }
}

/// The application store with every app reducer and the built-in
/// logger and timestamp middleware.
pub fn create_app_store(initial: AppState, bus: Option<EventBus>) -> Store<AppState> {
    let mut builder = reducers::register(Store::builder(initial))
        .middleware(middleware::logger())
        .middleware(middleware::timestamp());
    if let Some(bus) = bus {
        builder = builder.bus(bus);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize)]
    struct Counter {
        count: i64,
        label: String,
    }

    fn counter_store() -> Store<Counter> {
        Store::builder(Counter::default())
            .reducer("ADD", |s: &Counter, p: &Value| Counter {
                count: s.count + p.as_i64().unwrap_or(0),
                ..s.clone()
            })
            .reducer("LABEL", |s: &Counter, p: &Value| Counter {
                label: p.as_str().unwrap_or_default().to_string(),
                ..s.clone()
            })
            .build()
    }

    #[test]
    fn test_untyped_action_is_noop() {
        let store = counter_store();
        let before = store.get_state();
        let after = store.dispatch_plain(PlainAction::from_value(json!({})));
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_unknown_type_without_default_is_noop() {
        let store = counter_store();
        let before = store.get_state();
        let after = store.dispatch_plain(PlainAction::new("NOPE", json!(1)));
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_default_reducer_fallback() {
        let store = Store::builder(Counter::default())
            .reducer(DEFAULT_REDUCER, |s: &Counter, _: &Value| Counter {
                count: s.count - 1,
                ..s.clone()
            })
            .build();
        store.dispatch_plain(PlainAction::new("ANYTHING", Value::Null));
        assert_eq!(store.get_state().count, -1);
    }

    #[test]
    fn test_previous_snapshot_is_untouched() {
        let store = counter_store();
        let before = store.get_state();
        store.dispatch_plain(PlainAction::new("ADD", json!(5)));
        assert_eq!(before.count, 0);
        assert_eq!(store.get_state().count, 5);
    }

    #[test]
    fn test_middleware_runs_in_order_and_can_rewrite() {
        let store = Store::builder(Counter::default())
            .reducer("ADD", |s: &Counter, p: &Value| Counter {
                count: s.count + p.as_i64().unwrap_or(0),
                ..s.clone()
            })
            .middleware(Arc::new(|mut a: PlainAction, _: &Counter| {
                a.payload = json!(a.payload.as_i64().unwrap_or(0) * 10);
                a
            }))
            .middleware(Arc::new(|mut a: PlainAction, _: &Counter| {
                a.payload = json!(a.payload.as_i64().unwrap_or(0) + 1);
                a
            }))
            .build();
        store.dispatch_plain(PlainAction::new("ADD", json!(2)));
        assert_eq!(store.get_state().count, 21);
    }

    #[test]
    fn test_selector_fires_only_on_change() {
        let store = counter_store();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let c = calls.clone();
        store.subscribe("count", move |new: &Value, prev: &Value| {
            c.lock().unwrap().push((new.clone(), prev.clone()));
        });

        store.dispatch_plain(PlainAction::new("LABEL", json!("x")));
        store.dispatch_plain(PlainAction::new("ADD", json!(3)));

        let calls = calls.lock().unwrap();
        assert_eq!(*calls, vec![(json!(3), json!(0))]);
    }

    #[test]
    fn test_func_selector() {
        let store = counter_store();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        store.subscribe(
            Selector::func(|s: &Counter| json!(s.count > 2)),
            move |_: &Value, _: &Value| {
                h.fetch_add(1, Ordering::SeqCst);
            },
        );
        store.dispatch_plain(PlainAction::new("ADD", json!(1)));
        store.dispatch_plain(PlainAction::new("ADD", json!(5)));
        store.dispatch_plain(PlainAction::new("ADD", json!(5)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let store = counter_store();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        store.subscribe("count", |_: &Value, _: &Value| panic!("listener"));
        store.subscribe("count", move |_: &Value, _: &Value| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        store.dispatch_plain(PlainAction::new("ADD", json!(1)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let store = counter_store();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = store.subscribe("count", move |_: &Value, _: &Value| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(sub.unsubscribe());
        store.dispatch_plain(PlainAction::new("ADD", json!(1)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_notifications_batch_within_a_tick() {
        let store = counter_store();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let c = calls.clone();
        store.subscribe("count", move |new: &Value, prev: &Value| {
            c.lock().unwrap().push((new.clone(), prev.clone()));
        });

        store.dispatch_plain(PlainAction::new("ADD", json!(1)));
        store.dispatch_plain(PlainAction::new("ADD", json!(1)));
        store.dispatch_plain(PlainAction::new("ADD", json!(1)));
        assert!(calls.lock().unwrap().is_empty());

        store.flush();
        assert_eq!(*calls.lock().unwrap(), vec![(json!(3), json!(0))]);
    }

    #[tokio::test]
    async fn test_scheduled_flush_runs_after_yield() {
        let store = counter_store();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        store.subscribe("count", move |_: &Value, _: &Value| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        store.dispatch_plain(PlainAction::new("ADD", json!(1)));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_effect_returns_value_and_can_dispatch() {
        let store = counter_store();
        let result = store
            .dispatch(Action::effect(|store: Store<Counter>| async move {
                store.dispatch_plain(PlainAction::new("ADD", json!(4)));
                Ok(json!(store.get_state().count * 2))
            }))
            .await
            .unwrap();
        assert_eq!(result.value(), Some(json!(8)));
        assert_eq!(store.get_state().count, 4);
    }

    #[tokio::test]
    async fn test_effect_error_propagates() {
        let store = counter_store();
        let result = store
            .dispatch(Action::effect(|_store: Store<Counter>| async move {
                Err(AppError::Effect {
                    message: "nope".into(),
                })
            }))
            .await;
        assert!(matches!(result, Err(AppError::Effect { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dispatches_lose_no_updates() {
        let store = counter_store();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.dispatch(PlainAction::new("ADD", json!(1))).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get_state().count, 800);
    }

    #[test]
    fn test_state_changed_emitted_on_bus() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe(topics::STATE_CHANGED, move |event| {
            s.lock().unwrap().push(event.payload.clone());
            Ok(())
        });
        let store = Store::builder(Counter::default())
            .reducer("ADD", |s: &Counter, p: &Value| Counter {
                count: s.count + p.as_i64().unwrap_or(0),
                ..s.clone()
            })
            .bus(bus)
            .build();

        store.dispatch_plain(PlainAction::new("ADD", json!(2)));
        store.dispatch_plain(PlainAction::new("ADD", json!(0)));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["type"], "ADD");
        assert_eq!(seen[0]["prevState"]["count"], 0);
        assert_eq!(seen[0]["currentState"]["count"], 2);
    }

    static TRACKED_SERIALIZATIONS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Tracked {
        count: i64,
    }

    impl Serialize for Tracked {
        fn serialize<Ser: serde::Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
            TRACKED_SERIALIZATIONS.fetch_add(1, Ordering::SeqCst);
            serializer.serialize_i64(self.count)
        }
    }

    #[test]
    fn test_state_changed_skipped_without_listeners() {
        let bus = EventBus::new();
        let store = Store::builder(Tracked::default())
            .reducer("ADD", |s: &Tracked, p: &Value| Tracked {
                count: s.count + p.as_i64().unwrap_or(0),
            })
            .bus(bus.clone())
            .build();

        for _ in 0..10 {
            store.dispatch_plain(PlainAction::new("ADD", json!(1)));
        }
        assert_eq!(TRACKED_SERIALIZATIONS.load(Ordering::SeqCst), 0);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe(topics::STATE_CHANGED, move |event| {
            s.lock().unwrap().push(event.payload["currentState"].clone());
            Ok(())
        });
        store.dispatch_plain(PlainAction::new("ADD", json!(1)));
        assert_eq!(TRACKED_SERIALIZATIONS.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock().unwrap(), vec![json!(11)]);
    }
}
