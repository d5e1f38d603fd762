//! Completion API client.

use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures_util::StreamExt;
use serde_json::{json, Value};

use super::retry::RetryPolicy;
use super::types::{
    ApiMessage, CompletionRequest, CompletionResponse, RawResponse, RequestOptions,
    ThinkingConfig,
};
use crate::error::{ApiError, AppError, ConfigError, StreamError};
use crate::events::{topics, EventBus};
use crate::models::DEFAULT_MODEL;
use crate::sse::{LineBuffer, SseParser, StreamAccumulator, StreamProgress};
use crate::traits::{Headers, HttpClient, Response};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Connection settings for [`ApiClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_version: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    /// Probed by `health_check`; defaults to the base URL.
    pub health_url: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: API_VERSION.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            health_url: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl ApiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = (!key.trim().is_empty()).then_some(key);
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

    pub fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

/// Client for the messages endpoint.
///
/// Lifecycle events are published on the attached bus when there is one;
/// they are advisory and never affect the result.
pub struct ApiClient {
    http: Arc<dyn HttpClient>,
    config: RwLock<ApiConfig>,
    bus: Option<EventBus>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.config();
        f.debug_struct("ApiClient")
            .field("base_url", &config.base_url)
            .field("model", &config.model)
            .field("has_api_key", &config.api_key.is_some())
            .finish()
    }
}

impl ApiClient {
    pub fn new(http: Arc<dyn HttpClient>, config: ApiConfig) -> Self {
        Self {
            http,
            config: RwLock::new(config),
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, ApiConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ApiConfig> {
        self.config.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> ApiConfig {
        self.read().clone()
    }

    /// Set or clear (empty string) the API key.
    pub fn set_api_key(&self, key: &str) {
        let key = key.trim();
        self.write().api_key = (!key.is_empty()).then(|| key.to_string());
    }

    pub fn has_api_key(&self) -> bool {
        self.read().api_key.is_some()
    }

    pub fn set_model(&self, model: &str) {
        if !model.trim().is_empty() {
            self.write().model = model.to_string();
        }
    }

    pub fn model(&self) -> String {
        self.read().model.clone()
    }

    fn emit(&self, topic: &str, payload: Value) {
        if let Some(bus) = &self.bus {
            bus.emit(topic, payload);
        }
    }

    fn build_request(
        config: &ApiConfig,
        messages: Vec<ApiMessage>,
        options: &RequestOptions,
        stream: bool,
    ) -> CompletionRequest {
        let thinking = options.thinking_budget.map(ThinkingConfig::enabled);
        // Extended thinking rejects any temperature other than the default.
        let temperature = if thinking.is_some() {
            None
        } else {
            options.temperature
        };
        CompletionRequest {
            model: options.model.clone().unwrap_or_else(|| config.model.clone()),
            messages,
            max_tokens: options.max_tokens.unwrap_or(config.max_tokens),
            temperature,
            system: options.system.clone(),
            tools: options.tools.clone(),
            thinking,
            stream: stream.then_some(true),
        }
    }

    fn headers(config: &ApiConfig, api_key: &str) -> Headers {
        let mut headers = Headers::new();
        headers.insert("x-api-key".to_string(), api_key.to_string());
        headers.insert("anthropic-version".to_string(), config.api_version.clone());
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers
    }

    /// Everything needed to issue one request: settings, URL, body, headers.
    fn prepare(
        &self,
        messages: Vec<ApiMessage>,
        options: &RequestOptions,
        stream: bool,
    ) -> Result<(ApiConfig, String, String, Headers), AppError> {
        let config = self.config();
        let Some(api_key) = config.api_key.clone() else {
            return Err(ConfigError::MissingApiKey.into());
        };
        let request = Self::build_request(&config, messages, options, stream);
        let body = serde_json::to_string(&request)?;
        self.emit(
            topics::API_REQUEST,
            json!({
                "model": request.model,
                "stream": stream,
                "messageCount": request.messages.len(),
            }),
        );
        let url = config.messages_url();
        let headers = Self::headers(&config, &api_key);
        Ok((config, url, body, headers))
    }

    /// Run `op` until it succeeds, fails permanently, or the retry budget
    /// is spent.
    async fn with_retry<T, F, Fut>(&self, policy: &RetryPolicy, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && policy.should_retry(attempt) => {
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(
                        "Request failed ({}), retry {}/{} in {:?}",
                        err,
                        attempt + 1,
                        policy.max_retries,
                        delay
                    );
                    self.emit(
                        topics::API_RETRY,
                        json!({
                            "attempt": attempt + 1,
                            "maxRetries": policy.max_retries,
                            "status": err.status(),
                            "delayMs": delay.as_millis() as u64,
                        }),
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn report_error(&self, topic: &str, err: &AppError) {
        tracing::error!("API request failed: {}", err);
        self.emit(
            topic,
            json!({
                "code": err.error_code(),
                "message": err.user_message(),
                "status": err.http_status(),
            }),
        );
    }

    /// Send a conversation and wait for the reply.
    ///
    /// With `options.stream` set the reply is streamed and progress is
    /// discarded; use [`ApiClient::stream_message`] to observe it.
    pub async fn send_message(
        &self,
        messages: Vec<ApiMessage>,
        options: RequestOptions,
    ) -> Result<CompletionResponse, AppError> {
        if options.stream {
            return self.stream_message(messages, options, |_| {}).await;
        }

        let (config, url, body, headers) = self.prepare(messages, &options, false)?;
        let http = &self.http;
        let (url, body, headers) = (&url, &body, &headers);

        let result = self
            .with_retry(&config.retry, move || async move {
                let response: Response = http.post(url, body, headers).await?;
                if !response.is_success() {
                    return Err(ApiError::Status {
                        status: response.status,
                        body: response.text(),
                    });
                }
                let raw: RawResponse =
                    response
                        .json()
                        .map_err(|e: serde_json::Error| ApiError::InvalidResponse {
                            message: e.to_string(),
                        })?;
                Ok(CompletionResponse::from(raw))
            })
            .await;

        match result {
            Ok(response) => {
                self.emit(
                    topics::API_RESPONSE,
                    json!({
                        "id": response.id,
                        "model": response.model,
                        "stopReason": response.stop_reason,
                        "contentLength": response.content.len(),
                        "usage": {
                            "inputTokens": response.usage.input_tokens,
                            "outputTokens": response.usage.output_tokens,
                        },
                    }),
                );
                Ok(response)
            }
            Err(err) => {
                let err = AppError::from(err);
                self.report_error(topics::API_ERROR, &err);
                Err(err)
            }
        }
    }

    /// Stream a reply, reporting progress in arrival order.
    ///
    /// Only opening the stream is retried; once bytes arrive a failure ends
    /// the request. Malformed lines are logged and skipped.
    pub async fn stream_message<F>(
        &self,
        messages: Vec<ApiMessage>,
        options: RequestOptions,
        on_progress: F,
    ) -> Result<CompletionResponse, AppError>
    where
        F: Fn(StreamProgress) + Send + Sync,
    {
        let (config, url, body, headers) = self.prepare(messages, &options, true)?;
        let http = &self.http;
        let (url_ref, body_ref, headers_ref) = (&url, &body, &headers);

        let opened = self
            .with_retry(&config.retry, move || async move {
                http.post_stream(url_ref, body_ref, headers_ref)
                    .await
                    .map_err(ApiError::from)
            })
            .await;
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                let err = AppError::from(err);
                self.report_error(topics::API_ERROR, &err);
                return Err(err);
            }
        };

        self.emit(
            topics::API_STREAM_START,
            json!({ "model": options.model.as_deref().unwrap_or(&config.model) }),
        );

        let mut lines = LineBuffer::new();
        let mut parser = SseParser::new();
        let mut accumulator = StreamAccumulator::new();

        let outcome: Result<(), StreamError> = async {
            'chunks: while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| StreamError::ConnectionLost {
                    message: e.to_string(),
                })?;
                for line in lines.push(&chunk) {
                    if self.handle_line(&line, &mut parser, &mut accumulator, &on_progress)? {
                        break 'chunks;
                    }
                }
            }
            if !accumulator.is_finished() {
                if let Some(line) = lines.finish() {
                    self.handle_line(&line, &mut parser, &mut accumulator, &on_progress)?;
                }
            }
            Ok(())
        }
        .await;

        if let Err(err) = outcome {
            let err = AppError::from(err);
            self.report_error(topics::API_STREAM_ERROR, &err);
            return Err(err);
        }

        if !accumulator.is_finished() {
            tracing::warn!("Stream ended without message_stop");
        }
        let response = accumulator.finish();
        self.emit(
            topics::API_STREAM_END,
            json!({
                "id": response.id,
                "stopReason": response.stop_reason,
                "contentLength": response.content.len(),
            }),
        );
        Ok(response)
    }

    /// Decode one line. Returns true once the stream is finished.
    fn handle_line<F>(
        &self,
        line: &str,
        parser: &mut SseParser,
        accumulator: &mut StreamAccumulator,
        on_progress: &F,
    ) -> Result<bool, StreamError>
    where
        F: Fn(StreamProgress),
    {
        let event = match parser.feed_line(line) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(false),
            Err(e) => {
                tracing::warn!("Skipping malformed stream line: {}", e);
                return Ok(false);
            }
        };
        let terminal = event.is_terminal();
        if let Some(progress) = accumulator.apply(event)? {
            let payload = match &progress {
                StreamProgress::Content { delta, .. } => json!({ "kind": "content", "delta": delta }),
                StreamProgress::Thinking { delta } => json!({ "kind": "thinking", "delta": delta }),
            };
            self.emit(topics::API_STREAM_CHUNK, payload);
            on_progress(progress);
        }
        Ok(terminal)
    }

    /// Whether the API host answers at all. Any HTTP response counts.
    pub async fn health_check(&self) -> bool {
        let url = {
            let config = self.read();
            config
                .health_url
                .clone()
                .unwrap_or_else(|| config.base_url.clone())
        };
        match self.http.get(&url, &Headers::new()).await {
            Ok(response) => {
                tracing::debug!("Health check {} -> {}", url, response.status);
                true
            }
            Err(e) => {
                tracing::debug!("Health check {} failed: {}", url, e);
                false
            }
        }
    }
}
