//! Projections over store snapshots.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

type SelectorFn<S> = Arc<dyn Fn(&S) -> Value + Send + Sync>;

/// What a subscriber watches.
pub enum Selector<S> {
    /// The whole serialized snapshot.
    Whole,
    /// A dotted path over the serialized snapshot, e.g. `preferences.model`.
    Path(String),
    /// An arbitrary projection.
    Func(SelectorFn<S>),
}

impl<S> Selector<S> {
    pub fn path(path: impl Into<String>) -> Self {
        Selector::Path(path.into())
    }

    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&S) -> Value + Send + Sync + 'static,
    {
        Selector::Func(Arc::new(f))
    }
}

impl<S> Clone for Selector<S> {
    fn clone(&self) -> Self {
        match self {
            Selector::Whole => Selector::Whole,
            Selector::Path(p) => Selector::Path(p.clone()),
            Selector::Func(f) => Selector::Func(f.clone()),
        }
    }
}

impl<S> From<&str> for Selector<S> {
    fn from(path: &str) -> Self {
        Selector::path(path)
    }
}

impl<S: Serialize> Selector<S> {
    /// Project `state`. `serialized` caches the JSON form across selectors
    /// evaluated against the same snapshot.
    pub(crate) fn project(&self, state: &S, serialized: &mut Option<Value>) -> Value {
        match self {
            Selector::Func(f) => f(state),
            Selector::Whole => serialized_state(state, serialized).clone(),
            Selector::Path(path) => resolve_path(serialized_state(state, serialized), path),
        }
    }
}

fn serialized_state<'a, S: Serialize>(state: &S, cache: &'a mut Option<Value>) -> &'a Value {
    cache.get_or_insert_with(|| match serde_json::to_value(state) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Failed to serialize state for selector: {}", e);
            Value::Null
        }
    })
}

/// Sequential lookup of a dotted path. A missing or null intermediate
/// yields `Null`. Numeric segments index into arrays.
pub fn resolve_path(root: &Value, path: &str) -> Value {
    let mut current = root;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(v) => v,
                None => return Value::Null,
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(v) => v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        };
    }
    current.clone()
}

/// One level of structural comparison.
///
/// Arrays compare length and elements, objects compare key sets and
/// values, everything else compares by value.
pub fn shallow_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| l == r)
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k) == Some(v))
        }
        _ => a == b,
    }
}
