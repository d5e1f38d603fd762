//! Mock implementations for test fixtures.
//!
//! Re-exports the doubles from `insightwave::adapters::mock` and
//! `insightwave::storage::mock`, plus scripted completion replies.

pub use insightwave::adapters::mock::{MockHttpClient, MockResponse};
pub use insightwave::storage::mock::FaultyStore;
pub use insightwave::traits::{HttpClient, HttpError, Response};

use serde_json::json;

/// Buffered completion body carrying `text`.
pub fn reply_body(text: &str) -> serde_json::Value {
    json!({
        "id": "msg_test",
        "model": "claude-test",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 3, "output_tokens": 5}
    })
}

pub fn reply(text: &str) -> MockResponse {
    MockResponse::json(200, &reply_body(text))
}

/// SSE lines for a reply streamed as `deltas`.
pub fn sse_lines(deltas: &[&str]) -> Vec<String> {
    let mut lines = vec![
        "event: message_start\n".to_string(),
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_s\",\"model\":\"claude-test\",\"usage\":{\"input_tokens\":3}}}\n\n".to_string(),
    ];
    for delta in deltas {
        lines.push(format!(
            "data: {}\n\n",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": delta}})
        ));
    }
    lines.push("data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":5}}\n\n".to_string());
    lines.push("data: {\"type\":\"message_stop\"}\n\n".to_string());
    lines
}

pub fn streamed_reply(deltas: &[&str]) -> MockResponse {
    MockResponse::stream(sse_lines(deltas))
}
