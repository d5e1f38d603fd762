//! Stream line and event types.

/// A single line of an event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    /// `event: <type>`
    Event(String),
    /// `data: <payload>`
    Data(String),
    /// Blank line, terminates an event block
    Empty,
    /// `:` comment or an unrecognized line
    Comment(String),
}

/// Token usage reported by the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamUsage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

/// Decoded completion stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// First event of a reply; carries the message id.
    MessageStart {
        id: Option<String>,
        model: Option<String>,
        usage: StreamUsage,
    },
    /// Visible text appended to the reply.
    TextDelta { text: String },
    /// Extended-thinking text. Not part of the reply.
    ThinkingDelta { thinking: String },
    /// Keep-alive signal emitted while the model is thinking.
    ThinkingProgress,
    /// Top-level reply metadata such as the stop reason.
    MessageDelta {
        stop_reason: Option<String>,
        usage: StreamUsage,
    },
    MessageStop,
    /// Server-side failure reported mid-stream.
    Error {
        error_type: Option<String>,
        message: String,
    },
    Ping,
    /// `data: [DONE]` sentinel.
    Done,
    /// A well-formed event the decoder has no use for
    /// (`content_block_start`, `content_block_stop`, ...).
    Other(String),
}

impl StreamEvent {
    pub fn event_type_name(&self) -> &str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::TextDelta { .. } | StreamEvent::ThinkingDelta { .. } => {
                "content_block_delta"
            }
            StreamEvent::ThinkingProgress => "thinking_progress",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Ping => "ping",
            StreamEvent::Done => "done",
            StreamEvent::Other(name) => name,
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::MessageStop | StreamEvent::Done)
    }
}

/// Errors that can occur while decoding a `data:` line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseParseError {
    /// Payload is not valid JSON, or has the wrong shape for its type
    InvalidJson { event_type: String, source: String },
    /// Payload is JSON but carries no `type` field
    MissingType,
}

impl std::fmt::Display for SseParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SseParseError::InvalidJson { event_type, source } => {
                write!(f, "Invalid JSON for event '{}': {}", event_type, source)
            }
            SseParseError::MissingType => write!(f, "Stream event without a type"),
        }
    }
}

impl std::error::Error for SseParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(StreamEvent::MessageStop.is_terminal());
        assert!(StreamEvent::Done.is_terminal());
        assert!(!StreamEvent::Ping.is_terminal());
    }

    #[test]
    fn test_parse_error_display() {
        let err = SseParseError::InvalidJson {
            event_type: "message_delta".into(),
            source: "expected value".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid JSON for event 'message_delta': expected value"
        );
    }
}
