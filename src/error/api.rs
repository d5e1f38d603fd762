//! Errors raised by the completion API client.

use std::fmt;

/// API-specific error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    /// The endpoint answered with a non-2xx status.
    Status {
        status: u16,
        /// Raw error body as returned by the server.
        body: String,
    },

    /// No response was received (connection refused, DNS, reset).
    Transport {
        message: String,
    },

    /// The request timed out before a response arrived.
    Timeout {
        message: String,
    },

    /// A 2xx response whose body could not be interpreted.
    InvalidResponse {
        message: String,
    },
}

impl ApiError {
    /// Status codes worth another attempt: rate limiting and server errors.
    pub fn is_retryable_status(status: u16) -> bool {
        status == 429 || (500..600).contains(&status)
    }

    /// Whether the API client retries this error.
    ///
    /// Transport failures are surfaced immediately even though they are
    /// often transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => Self::is_retryable_status(*status),
            _ => false,
        }
    }

    /// HTTP status, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The `error.message` field of an Anthropic-style error body, if present.
    pub fn server_message(&self) -> Option<String> {
        match self {
            ApiError::Status { body, .. } => serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                }),
            _ => None,
        }
    }

    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Status { status, .. } => {
                let base = match *status {
                    400 => "The request was rejected by the API.".to_string(),
                    401 => "The API key was rejected. Please check it in the settings.".to_string(),
                    403 => "Your API key does not have access to this model.".to_string(),
                    404 => "The requested model or endpoint was not found.".to_string(),
                    413 => "The conversation is too large to send.".to_string(),
                    429 => "Too many requests. Please wait a moment and try again.".to_string(),
                    529 => "The API is currently overloaded. Please try again later.".to_string(),
                    500..=599 => {
                        "The API is experiencing issues. Please try again later.".to_string()
                    }
                    _ => format!("The API returned an error (HTTP {}).", status),
                };
                match self.server_message() {
                    Some(detail) => format!("{} ({})", base, detail),
                    None => base,
                }
            }
            ApiError::Transport { .. } => {
                "Unable to reach the API. Please check your internet connection.".to_string()
            }
            ApiError::Timeout { .. } => {
                "The request timed out. The service may be slow or unreachable.".to_string()
            }
            ApiError::InvalidResponse { .. } => {
                "Received an invalid response from the API. Please try again.".to_string()
            }
        }
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Status { status: 429, .. } => "E_API_RATE",
            ApiError::Status { .. } => "E_API_HTTP",
            ApiError::Transport { .. } => "E_API_CONN",
            ApiError::Timeout { .. } => "E_API_TIMEOUT",
            ApiError::InvalidResponse { .. } => "E_API_INVALID",
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Status { status, body } => write!(f, "API error ({}): {}", status, body),
            ApiError::Transport { message } => write!(f, "Transport error: {}", message),
            ApiError::Timeout { message } => write!(f, "Request timeout: {}", message),
            ApiError::InvalidResponse { message } => write!(f, "Invalid response: {}", message),
        }
    }
}

impl std::error::Error for ApiError {}
