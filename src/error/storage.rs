//! Persistence error types.

use thiserror::Error;

/// Errors produced by storage backends.
///
/// The storage service never lets these escape to callers; they are logged
/// and turned into `None` / `false`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StorageError {
    /// A write would exceed the backend's byte quota.
    #[error("storage quota exceeded in '{collection}' ({needed} bytes needed, limit {limit})")]
    QuotaExceeded {
        collection: String,
        needed: u64,
        limit: u64,
    },

    /// The backend cannot be used in this environment.
    #[error("{backend} storage unavailable: {message}")]
    Unavailable { backend: String, message: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }

    pub fn user_message(&self) -> String {
        match self {
            StorageError::QuotaExceeded { .. } => {
                "Local storage is full. Older chats were removed to make room.".to_string()
            }
            StorageError::Unavailable { .. } => {
                "Local storage is unavailable. Chats will not be kept after you quit.".to_string()
            }
            StorageError::Io(_) | StorageError::Serialization(_) => {
                "Your chat could not be saved locally.".to_string()
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::QuotaExceeded { .. } => "E_STORE_QUOTA",
            StorageError::Unavailable { .. } => "E_STORE_UNAVAILABLE",
            StorageError::Io(_) => "E_STORE_IO",
            StorageError::Serialization(_) => "E_STORE_SERDE",
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
