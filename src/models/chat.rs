use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::message::{Message, Role};

/// Title used until the first message names the chat.
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Maximum number of characters taken from the first message for the title.
pub const TITLE_MAX_CHARS: usize = 30;

/// A conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    /// Set on mutation, cleared once persisted.
    #[serde(default)]
    pub dirty: bool,
}

impl Chat {
    /// An empty chat with a freshly generated id.
    pub fn new() -> Self {
        Self::with_id(generate_chat_id())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: DEFAULT_CHAT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            dirty: false,
        }
    }

    pub fn message_index(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }

    /// Index of the nearest human message strictly before `index`.
    pub fn preceding_human_index(&self, index: usize) -> Option<usize> {
        self.messages[..index.min(self.messages.len())]
            .iter()
            .rposition(|m| m.role == Role::Human)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a chat title from the first message of a conversation.
pub fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return DEFAULT_CHAT_TITLE.to_string();
    }
    let mut chars = trimmed.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// `chat_<millis>_<random base36>`.
///
/// Collisions require two chats created in the same millisecond with the
/// same 8-character suffix.
pub fn generate_chat_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("chat_{}_{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_chat_is_empty_and_clean() {
        let chat = Chat::new();
        assert!(chat.id.starts_with("chat_"));
        assert!(chat.messages.is_empty());
        assert!(!chat.dirty);
        assert_eq!(chat.title, DEFAULT_CHAT_TITLE);
    }

    #[test]
    fn test_generated_ids_differ() {
        let a = generate_chat_id();
        let b = generate_chat_id();
        assert_ne!(a, b);
        assert_eq!(a.split('_').count(), 3);
    }

    #[test]
    fn test_derive_title_truncates_to_thirty_chars() {
        assert_eq!(derive_title("Short question"), "Short question");
        let long = "Explain the borrow checker to me like I am five years old";
        let title = derive_title(long);
        assert_eq!(title, "Explain the borrow checker to ...");
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
        assert_eq!(derive_title("   "), DEFAULT_CHAT_TITLE);
    }

    #[test]
    fn test_derive_title_counts_chars_not_bytes() {
        let title = derive_title(&"é".repeat(40));
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
    }

    #[test]
    fn test_preceding_human_index() {
        let mut chat = Chat::new();
        chat.messages.push(Message::assistant("greeting", None));
        chat.messages.push(Message::human("q1", Vec::new()));
        chat.messages.push(Message::assistant("a1", None));

        assert_eq!(chat.preceding_human_index(2), Some(1));
        assert_eq!(chat.preceding_human_index(0), None);
        assert_eq!(chat.preceding_human_index(1), None);
    }

    #[test]
    fn test_chat_round_trips_through_json() {
        let mut chat = Chat::new();
        chat.messages.push(Message::human("hello", Vec::new()));
        let json = serde_json::to_value(&chat).unwrap();
        assert!(json["createdAt"].is_i64());
        assert!(json["updatedAt"].is_i64());
        let back: Chat = serde_json::from_value(json).unwrap();
        assert_eq!(back.messages.len(), 1);
        assert_eq!(back.id, chat.id);
    }
}
