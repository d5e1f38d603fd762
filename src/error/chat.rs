//! Chat lifecycle errors.

use std::fmt;

/// Errors raised by the chat coordinator when an operation's
/// preconditions do not hold.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatError {
    /// No chat is currently selected.
    NoActiveChat,

    /// The chat id is not in the in-memory chat list.
    NotFound { chat_id: String },

    /// The message id is not in the current chat.
    MessageNotFound { message_id: String },

    /// The operation is only valid for messages of another role.
    InvalidRole {
        message_id: String,
        expected: &'static str,
    },

    /// Regeneration needs a human turn before the target message.
    NoPrecedingHumanMessage { message_id: String },

    /// A send is already in flight.
    Busy,

    /// Nothing to send.
    EmptyMessage,
}

impl ChatError {
    pub fn user_message(&self) -> String {
        match self {
            ChatError::NoActiveChat => "Start or select a chat first.".to_string(),
            ChatError::NotFound { .. } => "That chat no longer exists.".to_string(),
            ChatError::MessageNotFound { .. } => "That message no longer exists.".to_string(),
            ChatError::InvalidRole { expected, .. } => {
                format!("Only {} messages can be used for this action.", expected)
            }
            ChatError::NoPrecedingHumanMessage { .. } => {
                "There is no question to regenerate an answer for.".to_string()
            }
            ChatError::Busy => {
                "Please wait for the current response to complete before sending another message."
                    .to_string()
            }
            ChatError::EmptyMessage => "Type a message or attach a file first.".to_string(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ChatError::NoActiveChat => "E_CHAT_NONE",
            ChatError::NotFound { .. } => "E_CHAT_NOT_FOUND",
            ChatError::MessageNotFound { .. } => "E_CHAT_MSG",
            ChatError::InvalidRole { .. } => "E_CHAT_ROLE",
            ChatError::NoPrecedingHumanMessage { .. } => "E_CHAT_NO_HUMAN",
            ChatError::Busy => "E_CHAT_BUSY",
            ChatError::EmptyMessage => "E_CHAT_EMPTY",
        }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::NoActiveChat => write!(f, "No active chat"),
            ChatError::NotFound { chat_id } => write!(f, "Chat not found: {}", chat_id),
            ChatError::MessageNotFound { message_id } => {
                write!(f, "Message not found: {}", message_id)
            }
            ChatError::InvalidRole {
                message_id,
                expected,
            } => write!(f, "Message {} is not a {} message", message_id, expected),
            ChatError::NoPrecedingHumanMessage { message_id } => {
                write!(f, "No human message precedes {}", message_id)
            }
            ChatError::Busy => write!(f, "A message is already being processed"),
            ChatError::EmptyMessage => write!(f, "Message is empty"),
        }
    }
}

impl std::error::Error for ChatError {}
