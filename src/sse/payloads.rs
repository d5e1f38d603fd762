//! Payload shapes of the completion stream's `data:` lines.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct UsagePayload {
    #[serde(default)]
    pub input_tokens: Option<u32>,
    #[serde(default)]
    pub output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessageStartPayload {
    pub message: StartedMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StartedMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: UsagePayload,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ContentBlockDeltaPayload {
    pub delta: BlockDelta,
}

/// `text_delta` carries `text`, `thinking_delta` carries `thinking`.
#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct BlockDelta {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessageDeltaPayload {
    #[serde(default)]
    pub delta: MessageDeltaBody,
    #[serde(default)]
    pub usage: UsagePayload,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct MessageDeltaBody {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorPayload {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub message: String,
}
