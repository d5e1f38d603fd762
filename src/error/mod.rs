//! Unified error handling for the chat core.
//!
//! - **Error categories** classify errors for retry and messaging decisions
//! - **Domain errors**: API, stream, storage, chat lifecycle, configuration
//! - **Unified error type**: `AppError` consolidates all of them
//! - **Error context**: operation/chat metadata attached for debugging
//! - **Result alias**: `AppResult<T>`
//!
//! | Category | Source | Retried by the API client |
//! |----------|--------|---------------------------|
//! | Network | no response from the endpoint | No |
//! | Server | HTTP 429 / 5xx | Yes |
//! | Client | other HTTP 4xx | No |
//! | Configuration | missing API key | No |
//! | Storage | persistence backends | No (quota triggers eviction) |
//! | User | chat lifecycle misuse | No |

mod api;
mod app_error;
mod category;
mod chat;
mod config;
mod context;
mod result;
mod storage;
mod stream;

pub use api::ApiError;
pub use app_error::AppError;
pub use category::ErrorCategory;
pub use chat::ChatError;
pub use config::ConfigError;
pub use context::ErrorContext;
pub use result::{AppResult, ResultExt};
pub use storage::StorageError;
pub use stream::StreamError;
