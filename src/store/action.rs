//! Store actions.

use std::future::Future;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Store;
use crate::error::AppError;

/// A plain action: a `type` tag selecting the reducer plus a payload.
///
/// `action_type` is optional so that untyped input (`{}`) can reach the
/// store and be dropped there rather than failing to parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlainAction {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl PlainAction {
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        Self {
            action_type: Some(action_type.into()),
            payload,
            meta: Map::new(),
        }
    }

    /// An action without a type. Dispatching it is a no-op.
    pub fn untyped() -> Self {
        Self::default()
    }

    /// Parse `{type, payload, meta}` from JSON. Anything unparseable
    /// becomes an untyped action.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    pub fn action_type(&self) -> Option<&str> {
        self.action_type.as_deref()
    }
}

/// Deferred effect: receives a store handle and resolves to a value.
pub type Thunk<S> = Box<dyn FnOnce(Store<S>) -> BoxFuture<'static, Result<Value, AppError>> + Send>;

/// Either a plain action or an effect.
pub enum Action<S> {
    Plain(PlainAction),
    Effect(Thunk<S>),
}

impl<S> Action<S> {
    pub fn plain(action_type: impl Into<String>, payload: Value) -> Self {
        Action::Plain(PlainAction::new(action_type, payload))
    }

    /// Wrap an async closure as an effect action.
    pub fn effect<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Store<S>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, AppError>> + Send + 'static,
    {
        Action::Effect(Box::new(move |store| Box::pin(f(store))))
    }
}

impl<S> From<PlainAction> for Action<S> {
    fn from(action: PlainAction) -> Self {
        Action::Plain(action)
    }
}

impl<S> std::fmt::Debug for Action<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Plain(action) => f.debug_tuple("Plain").field(action).finish(),
            Action::Effect(_) => f.write_str("Effect(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_reads_type_and_payload() {
        let action = PlainAction::from_value(json!({"type": "ADD", "payload": 2}));
        assert_eq!(action.action_type(), Some("ADD"));
        assert_eq!(action.payload, json!(2));
    }

    #[test]
    fn test_from_value_empty_object_is_untyped() {
        let action = PlainAction::from_value(json!({}));
        assert_eq!(action.action_type(), None);
        assert_eq!(action.payload, Value::Null);
    }

    #[test]
    fn test_from_value_garbage_is_untyped() {
        let action = PlainAction::from_value(json!("not an action"));
        assert_eq!(action, PlainAction::untyped());
    }
}
