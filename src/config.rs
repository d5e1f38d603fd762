//! Client configuration.
//!
//! ```ignore
//! use insightwave::config::ClientConfig;
//!
//! let config = ClientConfig::from_env()?
//!     .with_model("claude-3-5-haiku-20241022")
//!     .with_auto_save_interval(Duration::from_secs(10));
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::api::{ApiConfig, RetryPolicy, DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS};
use crate::chat::CoordinatorConfig;
use crate::error::ConfigError;
use crate::models::DEFAULT_MODEL;
use crate::services::BoundaryConfig;
use crate::storage::{StorageConfig, StorageMode};

pub const ENV_API_KEY: &str = "INSIGHTWAVE_API_KEY";
pub const ENV_API_URL: &str = "INSIGHTWAVE_API_URL";
pub const ENV_MODEL: &str = "INSIGHTWAVE_MODEL";
pub const ENV_DATA_DIR: &str = "INSIGHTWAVE_DATA_DIR";
pub const ENV_STORAGE: &str = "INSIGHTWAVE_STORAGE";

/// `~/.insightwave`
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".insightwave"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Used until saved preferences provide one.
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub health_url: Option<String>,
    pub retry: RetryPolicy,
    /// Connect timeout of the HTTP client (default: 30s). Responses
    /// themselves are not time-bounded.
    pub connect_timeout: Duration,
    /// Defaults to [`default_data_dir`].
    pub data_dir: Option<PathBuf>,
    pub storage_mode: StorageMode,
    pub storage_quota: Option<u64>,
    /// Auto-save period for dirty chats (default: 30s)
    pub auto_save_interval: Duration,
    /// Budget for rendering one reply (default: 2s)
    pub render_timeout: Duration,
    /// Connectivity polling period (default: 30s)
    pub network_check_interval: Duration,
    /// Errors tolerated inside `error_window` before recovery mode (default: 5)
    pub max_errors: usize,
    pub error_window: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            health_url: None,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(30),
            data_dir: None,
            storage_mode: StorageMode::Auto,
            storage_quota: None,
            auto_save_interval: Duration::from_secs(30),
            render_timeout: Duration::from_secs(2),
            network_check_interval: Duration::from_secs(30),
            max_errors: 5,
            error_window: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = (!key.trim().is_empty()).then_some(key);
        self
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_health_url(mut self, url: impl Into<String>) -> Self {
        self.health_url = Some(url.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_storage_mode(mut self, mode: StorageMode) -> Self {
        self.storage_mode = mode;
        self
    }

    pub fn with_storage_quota(mut self, bytes: u64) -> Self {
        self.storage_quota = Some(bytes);
        self
    }

    pub fn with_auto_save_interval(mut self, interval: Duration) -> Self {
        self.auto_save_interval = interval;
        self
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn with_network_check_interval(mut self, interval: Duration) -> Self {
        self.network_check_interval = interval;
        self
    }

    pub fn with_error_limit(mut self, max_errors: usize, window: Duration) -> Self {
        self.max_errors = max_errors;
        self.error_window = window;
        self
    }

    /// Read the `INSIGHTWAVE_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`ClientConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(key) = var(ENV_API_KEY) {
            config = config.with_api_key(key);
        }
        if let Some(url) = var(ENV_API_URL) {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue {
                    key: ENV_API_URL.to_string(),
                    message: format!("'{}' is not an http(s) URL", url),
                });
            }
            config = config.with_api_url(url);
        }
        if let Some(model) = var(ENV_MODEL) {
            config = config.with_model(model);
        }
        if let Some(dir) = var(ENV_DATA_DIR) {
            config = config.with_data_dir(dir);
        }
        if let Some(mode) = var(ENV_STORAGE) {
            config = config.with_storage_mode(mode.parse()?);
        }
        Ok(config)
    }

    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        self.data_dir
            .clone()
            .or_else(default_data_dir)
            .ok_or(ConfigError::NoDataDirectory)
    }

    pub fn api_config(&self) -> ApiConfig {
        let mut api = ApiConfig::new()
            .with_base_url(self.api_url.clone())
            .with_model(self.model.clone())
            .with_max_tokens(self.max_tokens)
            .with_retry(self.retry.clone());
        if let Some(key) = &self.api_key {
            api = api.with_api_key(key.clone());
        }
        if let Some(url) = &self.health_url {
            api = api.with_health_url(url.clone());
        }
        api
    }

    pub fn storage_config(&self) -> Result<StorageConfig, ConfigError> {
        let mut storage = StorageConfig::new(self.data_dir()?).with_mode(self.storage_mode);
        if let Some(quota) = self.storage_quota {
            storage = storage.with_quota(quota);
        }
        Ok(storage)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            auto_save_interval: self.auto_save_interval,
            render_timeout: self.render_timeout,
        }
    }

    pub fn boundary_config(&self) -> BoundaryConfig {
        BoundaryConfig {
            max_errors: self.max_errors,
            window: self.error_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.api_url, DEFAULT_BASE_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.auto_save_interval, Duration::from_secs(30));
        assert_eq!(config.render_timeout, Duration::from_secs(2));
        assert_eq!(config.max_errors, 5);
        assert_eq!(config.error_window, Duration::from_secs(60));
        assert_eq!(config.storage_mode, StorageMode::Auto);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_from_lookup_reads_variables() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_API_KEY, "sk-env"),
            (ENV_API_URL, "http://localhost:9000"),
            (ENV_MODEL, "claude-test"),
            (ENV_DATA_DIR, "/tmp/iw"),
            (ENV_STORAGE, "kv"),
        ]))
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.api_url, "http://localhost:9000");
        assert_eq!(config.model, "claude-test");
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/iw"));
        assert_eq!(config.storage_mode, StorageMode::KeyValue);
    }

    #[test]
    fn test_blank_variables_are_ignored() {
        let config = ClientConfig::from_lookup(lookup(&[(ENV_API_KEY, "  "), (ENV_MODEL, "")])).unwrap();
        assert!(config.api_key.is_none());
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[(ENV_STORAGE, "cloud")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = ClientConfig::from_lookup(lookup(&[(ENV_API_URL, "ftp://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_api_config_carries_settings() {
        let api = ClientConfig::new()
            .with_api_key("sk-1")
            .with_api_url("https://proxy.test")
            .with_max_tokens(100)
            .api_config();
        assert_eq!(api.api_key.as_deref(), Some("sk-1"));
        assert_eq!(api.messages_url(), "https://proxy.test/v1/messages");
        assert_eq!(api.max_tokens, 100);
    }

    #[test]
    fn test_storage_config_uses_data_dir() {
        let storage = ClientConfig::new()
            .with_data_dir("/tmp/iw")
            .with_storage_mode(StorageMode::Memory)
            .with_storage_quota(1024)
            .storage_config()
            .unwrap();
        assert_eq!(storage.data_dir, PathBuf::from("/tmp/iw"));
        assert_eq!(storage.mode, StorageMode::Memory);
        assert_eq!(storage.quota_bytes, Some(1024));
    }
}
