//! Coarse classes of failure.
//!
//! The class decides whether the API client retries, and which hint the
//! REPL prints under a failed send.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The endpoint never answered: refused connection, DNS, timeout.
    Network,
    /// 429 and 5xx.
    Server,
    /// Any other 4xx.
    Client,
    /// Missing or invalid settings, usually the API key.
    Configuration,
    Storage,
    /// Unknown chat or message, wrong role, a send already running.
    User,
    /// Bugs and payloads that fail to decode.
    Internal,
}

impl ErrorCategory {
    /// Transient classes. The API client backs off and tries again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Server)
    }

    /// Lowercase tag used in log records and bus payloads.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Server => "server",
            Self::Client => "client",
            Self::Configuration => "configuration",
            Self::Storage => "storage",
            Self::User => "user",
            Self::Internal => "internal",
        }
    }

    pub fn summary(&self) -> &'static str {
        match self {
            Self::Network => "Could not reach the API",
            Self::Server => "The API is unavailable or rate limited",
            Self::Client => "The API rejected the request",
            Self::Configuration => "Settings are incomplete",
            Self::Storage => "Chats could not be saved",
            Self::User => "That action is not available here",
            Self::Internal => "Something went wrong",
        }
    }

    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::Network => "Check your internet connection, then resend",
            Self::Server => "Wait a moment and resend the message",
            Self::Client => "Check the model name and token limits in your settings",
            Self::Configuration => "Set an API key with /set apiKey <key>",
            Self::Storage => "Free some disk space or delete old chats",
            Self::User => "Use /list and /history to find valid ids",
            Self::Internal => "Reset with /new; report it if it keeps happening",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
