//! Insightwave - chat client core for an LLM completion API
//!
//! A reducer-based state store, an event bus, a streaming completion
//! client with retry, tiered persistence and the chat coordinator that
//! drives a conversation. The `insightwave` binary is a line-oriented
//! front end over these modules.

pub mod adapters;
pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod services;
pub mod sse;
pub mod storage;
pub mod store;
pub mod traits;

pub use chat::{ChatCoordinator, SendOptions};
pub use config::ClientConfig;
pub use error::{AppError, AppResult};
pub use events::EventBus;
