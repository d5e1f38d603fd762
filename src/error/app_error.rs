//! Unified error type for the chat core.

use std::fmt;

use super::api::ApiError;
use super::category::ErrorCategory;
use super::chat::ChatError;
use super::config::ConfigError;
use super::context::ErrorContext;
use super::storage::StorageError;
use super::stream::StreamError;

/// Unified error type.
///
/// Consolidates the domain errors so callers get one categorization,
/// one retry decision and one user-facing message.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Completion API failures.
    Api(ApiError),

    /// Failures while consuming a streamed response.
    Stream(StreamError),

    /// Persistence failures (only surfaced by backends, never by the service).
    Storage(StorageError),

    /// Chat lifecycle precondition failures.
    Chat(ChatError),

    /// Missing or invalid configuration.
    Config(ConfigError),

    /// Failure inside an effectful store action.
    Effect { message: String },

    /// Wrapped error with additional context.
    WithContext {
        error: Box<AppError>,
        context: ErrorContext,
    },
}

impl AppError {
    /// Get the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Api(err) => match err {
                ApiError::Status { status, .. } if ApiError::is_retryable_status(*status) => {
                    ErrorCategory::Server
                }
                ApiError::Status { .. } => ErrorCategory::Client,
                ApiError::Transport { .. } | ApiError::Timeout { .. } => ErrorCategory::Network,
                ApiError::InvalidResponse { .. } => ErrorCategory::Internal,
            },
            AppError::Stream(err) => match err {
                StreamError::ConnectionLost { .. } => ErrorCategory::Network,
                StreamError::ServerError { .. } => ErrorCategory::Server,
                StreamError::ParseError { .. } => ErrorCategory::Internal,
            },
            AppError::Storage(_) => ErrorCategory::Storage,
            AppError::Chat(_) => ErrorCategory::User,
            AppError::Config(_) => ErrorCategory::Configuration,
            AppError::Effect { .. } => ErrorCategory::Internal,
            AppError::WithContext { error, .. } => error.category(),
        }
    }

    /// Whether the API client's retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Api(err) => err.is_retryable(),
            AppError::WithContext { error, .. } => error.is_retryable(),
            _ => false,
        }
    }

    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Api(err) => err.user_message(),
            AppError::Stream(err) => err.user_message(),
            AppError::Storage(err) => err.user_message(),
            AppError::Chat(err) => err.user_message(),
            AppError::Config(err) => err.user_message(),
            AppError::Effect { .. } => {
                "Something went wrong. Please try again.".to_string()
            }
            AppError::WithContext { error, .. } => error.user_message(),
        }
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Api(err) => err.error_code(),
            AppError::Stream(err) => err.error_code(),
            AppError::Storage(err) => err.error_code(),
            AppError::Chat(err) => err.error_code(),
            AppError::Config(err) => err.error_code(),
            AppError::Effect { .. } => "E_EFFECT",
            AppError::WithContext { error, .. } => error.error_code(),
        }
    }

    /// Attach context to this error.
    pub fn with_context(self, ctx: ErrorContext) -> Self {
        AppError::WithContext {
            error: Box::new(self),
            context: ctx,
        }
    }

    /// Get the context if this error has one attached.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            AppError::WithContext { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Get the inner error without context.
    pub fn inner(&self) -> &AppError {
        match self {
            AppError::WithContext { error, .. } => error.inner(),
            _ => self,
        }
    }

    /// HTTP status of the underlying API error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self.inner() {
            AppError::Api(err) => err.status(),
            _ => None,
        }
    }

    pub fn recovery_hint(&self) -> &'static str {
        self.category().recovery_hint()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Api(err) => write!(f, "{}", err),
            AppError::Stream(err) => write!(f, "{}", err),
            AppError::Storage(err) => write!(f, "{}", err),
            AppError::Chat(err) => write!(f, "{}", err),
            AppError::Config(err) => write!(f, "{}", err),
            AppError::Effect { message } => write!(f, "Effect failed: {}", message),
            AppError::WithContext { error, context } => write!(f, "{} ({})", error, context),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Api(err) => Some(err),
            AppError::Stream(err) => Some(err),
            AppError::Storage(err) => Some(err),
            AppError::Chat(err) => Some(err),
            AppError::Config(err) => Some(err),
            AppError::Effect { .. } => None,
            AppError::WithContext { error, .. } => error.source(),
        }
    }
}

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        AppError::Api(err)
    }
}

impl From<StreamError> for AppError {
    fn from(err: StreamError) -> Self {
        AppError::Stream(err)
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Storage(err)
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        AppError::Chat(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Api(ApiError::InvalidResponse {
            message: err.to_string(),
        })
    }
}
