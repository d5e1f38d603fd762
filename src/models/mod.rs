//! Domain model: chats, messages, attachments and preferences.

mod chat;
mod file;
mod message;
mod preferences;

pub use chat::{derive_title, generate_chat_id, Chat, DEFAULT_CHAT_TITLE, TITLE_MAX_CHARS};
pub use file::FileAttachment;
pub use message::{Message, Role};
pub use preferences::{Preferences, DEFAULT_MODEL};
