//! Completion stream decoder
//!
//! The completion endpoint streams server-sent events:
//! - `event: <type>` - event type line (informational)
//! - `data: <json>` - payload line, its `type` field names the event
//! - Empty line - end of an event block
//! - Lines starting with `:` - comments (ignored)
//!
//! # Module structure
//! - `events` - line and event types (SseLine, StreamEvent, SseParseError)
//! - `payloads` - internal payload deserialization structs
//! - `parser` - line classification, payload decoding, byte to line buffering
//! - `accumulator` - folds events into a reply and reports progress

mod accumulator;
mod events;
mod parser;
mod payloads;

pub use accumulator::{StreamAccumulator, StreamProgress, DEFAULT_STOP_REASON};
pub use events::{SseLine, SseParseError, StreamEvent, StreamUsage};
pub use parser::{parse_sse_line, parse_stream_event, LineBuffer, SseParser, DONE_SENTINEL};
