//! Trait seams for dependency injection.
//!
//! - [`HttpClient`] - HTTP operations (GET, POST, streaming POST)
//!
//! The storage backend and content renderer seams live next to their
//! consumers in `crate::storage` and `crate::chat`.

pub mod http;

pub use http::{ByteStream, Headers, HttpClient, HttpError, Response};
