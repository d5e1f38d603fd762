use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::file::FileAttachment;

/// Author of a message in a chat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

impl Role {
    /// Role name used by the completion API.
    pub fn api_name(&self) -> &'static str {
        match self {
            Role::Human => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Human => "human",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message within a chat.
///
/// Messages are values: edits produce a new `Message` through
/// [`Message::edited`] rather than mutating one that is already part of a
/// snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    /// Displayed content. For rendered assistant replies this is HTML.
    pub content: String,
    /// Unrendered Markdown, when `content` went through the renderer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub edited: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub edited_at: Option<DateTime<Utc>>,
    /// Synthetic assistant message describing a failed request.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            role,
            content,
            raw_content: None,
            files: Vec::new(),
            timestamp: Utc::now(),
            model: None,
            edited: false,
            edited_at: None,
            is_error: false,
        }
    }

    /// A human message, optionally carrying attachments.
    pub fn human(content: impl Into<String>, files: Vec<FileAttachment>) -> Self {
        let mut message = Self::new(Role::Human, content.into());
        message.files = files;
        message
    }

    /// An assistant reply produced by `model`.
    pub fn assistant(content: impl Into<String>, model: Option<String>) -> Self {
        let mut message = Self::new(Role::Assistant, content.into());
        message.model = model;
        message
    }

    /// An in-chat error explanation shown in place of a reply.
    pub fn error(explanation: impl Into<String>) -> Self {
        let mut message = Self::new(Role::Assistant, explanation.into());
        message.is_error = true;
        message
    }

    /// A copy of this message with its content replaced and marked edited.
    pub fn edited(&self, new_content: impl Into<String>) -> Self {
        Self {
            content: new_content.into(),
            raw_content: None,
            edited: true,
            edited_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    pub fn is_human(&self) -> bool {
        self.role == Role::Human
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// Text to send back to the API for this turn (Markdown, not HTML).
    pub fn source_text(&self) -> &str {
        self.raw_content.as_deref().unwrap_or(&self.content)
    }
}
