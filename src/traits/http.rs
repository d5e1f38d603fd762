//! HTTP transport seam.
//!
//! The API client talks to the network only through [`HttpClient`], so
//! tests can script responses and byte streams without a server.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::ApiError;

pub type Headers = HashMap<String, String>;

/// Streamed response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>;

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: Bytes) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_headers(status: u16, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Transport-level failure.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpError {
    /// No connection could be established.
    ConnectionFailed(String),
    Timeout(String),
    /// The server answered with a non-2xx status before any body was
    /// streamed.
    Status { status: u16, body: String },
    /// Reading the body failed.
    Io(String),
    InvalidUrl(String),
    Other(String),
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            HttpError::Timeout(msg) => write!(f, "Request timeout: {}", msg),
            HttpError::Status { status, body } => write!(f, "HTTP {}: {}", status, body),
            HttpError::Io(msg) => write!(f, "IO error: {}", msg),
            HttpError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            HttpError::Other(msg) => write!(f, "HTTP error: {}", msg),
        }
    }
}

impl std::error::Error for HttpError {}

impl From<HttpError> for ApiError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Status { status, body } => ApiError::Status { status, body },
            HttpError::Timeout(message) => ApiError::Timeout { message },
            other => ApiError::Transport {
                message: other.to_string(),
            },
        }
    }
}

/// HTTP operations used by the API client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError>;

    async fn post(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError>;

    /// POST and stream the response body.
    ///
    /// A non-2xx status is reported as [`HttpError::Status`] with the body
    /// read in full.
    async fn post_stream(
        &self,
        url: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<ByteStream, HttpError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_is_success() {
        assert!(Response::new(200, Bytes::new()).is_success());
        assert!(Response::new(204, Bytes::new()).is_success());
        assert!(!Response::new(300, Bytes::new()).is_success());
        assert!(!Response::new(429, Bytes::new()).is_success());
    }

    #[test]
    fn test_response_text_and_json() {
        let response = Response::new(200, Bytes::from(r#"{"id":"msg_1"}"#));
        assert_eq!(response.text(), r#"{"id":"msg_1"}"#);
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["id"], "msg_1");
    }

    #[test]
    fn test_http_error_into_api_error() {
        let status: ApiError = HttpError::Status {
            status: 503,
            body: "busy".into(),
        }
        .into();
        assert_eq!(status.status(), Some(503));
        assert!(status.is_retryable());

        let timeout: ApiError = HttpError::Timeout("slow".into()).into();
        assert!(matches!(timeout, ApiError::Timeout { .. }));

        let refused: ApiError = HttpError::ConnectionFailed("refused".into()).into();
        assert!(matches!(refused, ApiError::Transport { .. }));
        assert!(!refused.is_retryable());
    }
}
