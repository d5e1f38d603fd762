//! Stream parsing logic
//!
//! `parse_sse_line` classifies one line, `parse_stream_event` decodes one
//! `data:` payload, and `SseParser` ties the two together line by line.
//! `LineBuffer` turns arbitrary byte chunks into complete lines.

mod lines;

use serde::de::DeserializeOwned;

use crate::sse::events::{SseLine, SseParseError, StreamEvent, StreamUsage};
use crate::sse::payloads::{
    ContentBlockDeltaPayload, ErrorPayload, MessageDeltaPayload, MessageStartPayload,
    UsagePayload,
};

pub use lines::LineBuffer;

/// Sentinel some proxies append after the last event.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Parse a single stream line into its component type
pub fn parse_sse_line(line: &str) -> SseLine {
    if line.is_empty() {
        return SseLine::Empty;
    }

    if let Some(stripped) = line.strip_prefix(':') {
        return SseLine::Comment(stripped.trim().to_string());
    }

    if let Some(rest) = line.strip_prefix("event:") {
        return SseLine::Event(rest.trim().to_string());
    }

    if let Some(rest) = line.strip_prefix("data:") {
        return SseLine::Data(rest.trim().to_string());
    }

    // Unknown line format - treat as comment
    SseLine::Comment(line.to_string())
}

fn decode<T: DeserializeOwned>(event_type: &str, value: serde_json::Value) -> Result<T, SseParseError> {
    serde_json::from_value(value).map_err(|e| SseParseError::InvalidJson {
        event_type: event_type.to_string(),
        source: e.to_string(),
    })
}

fn usage(payload: UsagePayload) -> StreamUsage {
    StreamUsage {
        input_tokens: payload.input_tokens,
        output_tokens: payload.output_tokens,
    }
}

/// Decode the payload of one `data:` line.
///
/// The event type comes from the payload's `type` field.
pub fn parse_stream_event(data: &str) -> Result<StreamEvent, SseParseError> {
    if data == DONE_SENTINEL {
        return Ok(StreamEvent::Done);
    }

    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|e| SseParseError::InvalidJson {
            event_type: "unknown".to_string(),
            source: e.to_string(),
        })?;
    let event_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(SseParseError::MissingType)?
        .to_string();

    match event_type.as_str() {
        "message_start" => {
            let payload: MessageStartPayload = decode(&event_type, value)?;
            Ok(StreamEvent::MessageStart {
                id: payload.message.id,
                model: payload.message.model,
                usage: usage(payload.message.usage),
            })
        }
        "content_block_delta" => {
            let payload: ContentBlockDeltaPayload = decode(&event_type, value)?;
            match (payload.delta.text, payload.delta.thinking) {
                (Some(text), _) => Ok(StreamEvent::TextDelta { text }),
                (None, Some(thinking)) => Ok(StreamEvent::ThinkingDelta { thinking }),
                // signature_delta, input_json_delta and friends
                (None, None) => Ok(StreamEvent::Other(event_type)),
            }
        }
        "thinking_progress" => Ok(StreamEvent::ThinkingProgress),
        "message_delta" => {
            let payload: MessageDeltaPayload = decode(&event_type, value)?;
            Ok(StreamEvent::MessageDelta {
                stop_reason: payload.delta.stop_reason,
                usage: usage(payload.usage),
            })
        }
        "message_stop" => Ok(StreamEvent::MessageStop),
        "error" => {
            let payload: ErrorPayload = decode(&event_type, value)?;
            Ok(StreamEvent::Error {
                error_type: payload.error.error_type,
                message: payload.error.message,
            })
        }
        "ping" => Ok(StreamEvent::Ping),
        _ => Ok(StreamEvent::Other(event_type)),
    }
}

/// Line-oriented stream parser.
///
/// Each `data:` line is decoded on its own; blank lines, comments and
/// `event:` lines produce nothing. The last `event:` name is kept for
/// diagnostics only.
#[derive(Debug, Default)]
pub struct SseParser {
    last_event_type: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a line to the parser, potentially returning an event
    ///
    /// Returns:
    /// - `Ok(Some(event))` - the line carried an event
    /// - `Ok(None)` - the line was consumed without producing one
    /// - `Err(error)` - the line's payload could not be decoded
    pub fn feed_line(&mut self, line: &str) -> Result<Option<StreamEvent>, SseParseError> {
        match parse_sse_line(line) {
            SseLine::Event(event_type) => {
                self.last_event_type = Some(event_type);
                Ok(None)
            }
            SseLine::Data(data) if data.is_empty() => Ok(None),
            SseLine::Data(data) => parse_stream_event(&data).map(Some),
            SseLine::Empty => {
                self.last_event_type = None;
                Ok(None)
            }
            SseLine::Comment(_) => Ok(None),
        }
    }

    /// Name from the most recent `event:` line of the current block.
    pub fn last_event_type(&self) -> Option<&str> {
        self.last_event_type.as_deref()
    }

    pub fn reset(&mut self) {
        self.last_event_type = None;
    }
}
