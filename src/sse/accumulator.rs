//! Folding stream events into a completed reply.

use crate::api::{CompletionResponse, Usage};
use crate::error::StreamError;
use crate::sse::events::{StreamEvent, StreamUsage};

/// Stop reason recorded when `message_stop` arrives without one.
pub const DEFAULT_STOP_REASON: &str = "end_turn";

/// Progress reported to the caller while a reply streams in.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamProgress {
    /// New visible text. `content` is everything received so far.
    Content { delta: String, content: String },
    /// The model is thinking. `delta` is empty for bare keep-alives.
    Thinking { delta: String },
}

/// Accumulates stream events into a [`CompletionResponse`].
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    id: Option<String>,
    model: Option<String>,
    content: String,
    thinking: String,
    stop_reason: Option<String>,
    usage: Usage,
    finished: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn merge_usage(&mut self, usage: StreamUsage) {
        if let Some(input) = usage.input_tokens {
            self.usage.input_tokens = input;
        }
        if let Some(output) = usage.output_tokens {
            self.usage.output_tokens = output;
        }
    }

    /// Apply one event. Returns the progress it represents, if any.
    pub fn apply(&mut self, event: StreamEvent) -> Result<Option<StreamProgress>, StreamError> {
        match event {
            StreamEvent::MessageStart { id, model, usage } => {
                self.id = id;
                self.model = model;
                self.merge_usage(usage);
                Ok(None)
            }
            StreamEvent::TextDelta { text } => {
                self.content.push_str(&text);
                Ok(Some(StreamProgress::Content {
                    delta: text,
                    content: self.content.clone(),
                }))
            }
            StreamEvent::ThinkingDelta { thinking } => {
                self.thinking.push_str(&thinking);
                Ok(Some(StreamProgress::Thinking { delta: thinking }))
            }
            StreamEvent::ThinkingProgress => Ok(Some(StreamProgress::Thinking {
                delta: String::new(),
            })),
            StreamEvent::MessageDelta { stop_reason, usage } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
                self.merge_usage(usage);
                Ok(None)
            }
            StreamEvent::MessageStop => {
                self.finished = true;
                self.stop_reason
                    .get_or_insert_with(|| DEFAULT_STOP_REASON.to_string());
                Ok(None)
            }
            StreamEvent::Done => {
                self.finished = true;
                Ok(None)
            }
            StreamEvent::Error {
                error_type,
                message,
            } => Err(StreamError::ServerError {
                error_type,
                message,
            }),
            StreamEvent::Ping | StreamEvent::Other(_) => Ok(None),
        }
    }

    /// Whether a terminal event has been applied.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn message_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn finish(self) -> CompletionResponse {
        CompletionResponse {
            id: self.id,
            model: self.model,
            content: self.content,
            thinking: (!self.thinking.is_empty()).then_some(self.thinking),
            stop_reason: self.stop_reason,
            usage: self.usage,
        }
    }
}
