//! Built-in action middleware.
//!
//! A middleware sees every plain action before its reducer runs and may
//! rewrite it. Middleware runs in registration order.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::action::PlainAction;

pub type Middleware<S> = Arc<dyn Fn(PlainAction, &S) -> PlainAction + Send + Sync>;

/// Log every action at debug level.
pub fn logger<S>() -> Middleware<S> {
    Arc::new(|action: PlainAction, _state: &S| {
        tracing::debug!(
            action_type = action.action_type().unwrap_or("<none>"),
            "dispatch"
        );
        action
    })
}

/// Stamp `meta.timestamp` (epoch millis) on every action.
pub fn timestamp<S>() -> Middleware<S> {
    Arc::new(|mut action: PlainAction, _state: &S| {
        action
            .meta
            .insert("timestamp".to_string(), Value::from(Utc::now().timestamp_millis()));
        action
    })
}
