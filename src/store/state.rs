//! Application snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Chat, FileAttachment, Preferences};

/// Most recent errors kept in the snapshot.
pub const MAX_ERROR_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    #[default]
    Online,
    Offline,
}

/// An error as recorded in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub message: String,
    pub code: String,
    #[serde(default)]
    pub source: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>, code: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The assistant reply currently being streamed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamingState {
    pub chat_id: String,
    pub content: String,
    pub thinking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    /// Newest first.
    pub chats: Vec<Arc<Chat>>,
    pub current_chat_id: Option<String>,
    pub is_processing: bool,
    pub preferences: Preferences,
    pub network_status: NetworkStatus,
    pub pending_requests: u32,
    pub errors: Vec<ErrorRecord>,
    pub last_error: Option<ErrorRecord>,
    pub attached_files: Vec<FileAttachment>,
    pub streaming: Option<StreamingState>,
    pub recovery_mode: bool,
}

impl AppState {
    pub fn with_preferences(preferences: Preferences) -> Self {
        Self {
            preferences,
            ..Self::default()
        }
    }

    pub fn chat(&self, chat_id: &str) -> Option<&Arc<Chat>> {
        self.chats.iter().find(|c| c.id == chat_id)
    }

    pub fn current_chat(&self) -> Option<&Arc<Chat>> {
        self.current_chat_id.as_deref().and_then(|id| self.chat(id))
    }

    pub fn is_online(&self) -> bool {
        self.network_status == NetworkStatus::Online
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let state = AppState::default();
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["currentChatId"], serde_json::Value::Null);
        assert_eq!(value["isProcessing"], false);
        assert_eq!(value["networkStatus"], "online");
        assert_eq!(value["preferences"]["maxTokens"], 4096);
    }

    #[test]
    fn test_current_chat_lookup() {
        let chat = Arc::new(Chat::with_id("chat_a"));
        let state = AppState {
            chats: vec![chat.clone()],
            current_chat_id: Some("chat_a".into()),
            ..AppState::default()
        };
        assert!(Arc::ptr_eq(state.current_chat().unwrap(), &chat));
        assert!(state.chat("chat_b").is_none());
    }
}
