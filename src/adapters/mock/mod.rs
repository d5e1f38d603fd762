//! Test doubles for the transport seam.
//!
//! - [`MockHttpClient`] - scripted HTTP responses and byte streams

pub mod http;

pub use http::{MockHttpClient, MockResponse, RecordedRequest};
