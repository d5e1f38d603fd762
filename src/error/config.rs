//! Configuration errors.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// No credential is configured for the completion API.
    MissingApiKey,

    /// A setting has a value that cannot be used.
    InvalidValue { key: String, message: String },

    /// The data directory could not be determined.
    NoDataDirectory,
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::MissingApiKey => {
                "No API key is configured. Add your API key in the settings to start chatting."
                    .to_string()
            }
            ConfigError::InvalidValue { key, message } => {
                format!("The setting '{}' is invalid: {}", key, message)
            }
            ConfigError::NoDataDirectory => {
                "Could not determine where to store chats on this system.".to_string()
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ConfigError::MissingApiKey => "E_CFG_KEY",
            ConfigError::InvalidValue { .. } => "E_CFG_INVALID",
            ConfigError::NoDataDirectory => "E_CFG_DATA_DIR",
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingApiKey => write!(f, "API key not configured"),
            ConfigError::InvalidValue { key, message } => {
                write!(f, "Invalid value for {}: {}", key, message)
            }
            ConfigError::NoDataDirectory => write!(f, "Data directory not found"),
        }
    }
}

impl std::error::Error for ConfigError {}
