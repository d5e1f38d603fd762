//! User preferences with a fixed default schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-20250219";

/// Flat preference mapping.
///
/// Known keys are typed; anything else a front end stores lands in
/// `extra` and survives a save/load cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub thinking_enabled: bool,
    pub thinking_budget: u32,
    pub theme: String,
    pub system_prompt: String,
    pub streaming: bool,
    pub markdown_enabled: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            thinking_enabled: false,
            thinking_budget: 1024,
            theme: "system".to_string(),
            system_prompt: String::new(),
            streaming: true,
            markdown_enabled: true,
            extra: BTreeMap::new(),
        }
    }
}

impl Preferences {
    /// Overlay `partial` (a JSON object) on top of these preferences.
    ///
    /// Keys absent from `partial` keep their current values; a value of the
    /// wrong type for a known key is ignored with a warning.
    pub fn merged(&self, partial: &Value) -> Preferences {
        let Some(overrides) = partial.as_object() else {
            return self.clone();
        };
        let mut base = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => return self.clone(),
        };
        for (key, value) in overrides {
            let mut candidate = base.clone();
            candidate.insert(key.clone(), value.clone());
            match serde_json::from_value::<Preferences>(Value::Object(candidate)) {
                Ok(_) => {
                    base.insert(key.clone(), value.clone());
                }
                Err(e) => {
                    tracing::warn!("Ignoring preference '{}': {}", key, e);
                }
            }
        }
        serde_json::from_value(Value::Object(base)).unwrap_or_else(|_| self.clone())
    }

    /// Defaults overlaid with a saved record. Saved values win.
    pub fn from_saved(saved: &Value) -> Preferences {
        Preferences::default().merged(saved)
    }

    /// Look up a preference by its camelCase key.
    pub fn get(&self, key: &str) -> Option<Value> {
        serde_json::to_value(self).ok()?.get(key).cloned()
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}
