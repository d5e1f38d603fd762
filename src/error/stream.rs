//! Streaming-related error types.

use std::fmt;

/// Errors raised while consuming a streamed completion.
///
/// Per-line parse failures are logged and skipped by the decoder; only
/// failures that end the stream are reported through this type.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    /// The byte stream broke off mid-response.
    ConnectionLost {
        message: String,
    },

    /// The server sent an `error` event.
    ServerError {
        error_type: Option<String>,
        message: String,
    },

    /// A line could not be decoded.
    ParseError {
        line: String,
        message: String,
    },
}

impl StreamError {
    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            StreamError::ConnectionLost { .. } => {
                "The connection was lost while the response was streaming. Please try again."
                    .to_string()
            }
            StreamError::ServerError { error_type, message } => match error_type.as_deref() {
                Some("overloaded_error") => {
                    "The API is currently overloaded. Please try again later.".to_string()
                }
                _ => format!("The API reported an error: {}", message),
            },
            StreamError::ParseError { .. } => {
                "Received malformed data from the API. Please try again.".to_string()
            }
        }
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            StreamError::ConnectionLost { .. } => "E_STREAM_CONN",
            StreamError::ServerError { .. } => "E_STREAM_SERVER",
            StreamError::ParseError { .. } => "E_STREAM_PARSE",
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::ConnectionLost { message } => {
                write!(f, "Stream connection lost: {}", message)
            }
            StreamError::ServerError { error_type, message } => match error_type {
                Some(t) => write!(f, "Stream error [{}]: {}", t, message),
                None => write!(f, "Stream error: {}", message),
            },
            StreamError::ParseError { line, message } => {
                write!(f, "Failed to parse stream line '{}': {}", line, message)
            }
        }
    }
}

impl std::error::Error for StreamError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overloaded_message() {
        let err = StreamError::ServerError {
            error_type: Some("overloaded_error".to_string()),
            message: "Overloaded".to_string(),
        };
        assert!(err.user_message().contains("overloaded"));
        assert_eq!(err.to_string(), "Stream error [overloaded_error]: Overloaded");
    }

    #[test]
    fn test_connection_lost_display() {
        let err = StreamError::ConnectionLost {
            message: "reset by peer".to_string(),
        };
        assert_eq!(err.to_string(), "Stream connection lost: reset by peer");
        assert_eq!(err.error_code(), "E_STREAM_CONN");
    }
}
