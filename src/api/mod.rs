//! Client for the completion API.
//!
//! - `client` - [`ApiClient`]: buffered and streamed requests with retry
//! - `retry` - [`RetryPolicy`]: exponential backoff with jitter
//! - `types` - request and response wire types

mod client;
mod retry;
mod types;

pub use client::{ApiClient, ApiConfig, API_VERSION, DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS};
pub use retry::RetryPolicy;
pub use types::{
    ApiMessage, CompletionRequest, CompletionResponse, ContentBlock, ImageSource,
    MessageContent, RequestOptions, ThinkingConfig, Usage,
};
