//! Mock HTTP client for testing.
//!
//! Responses are scripted per URL. Several responses queued for the same
//! URL are served in order; the last one keeps answering once the queue
//! is down to it, so a single scripted response acts as a fixed reply.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::traits::{ByteStream, Headers, HttpClient, HttpError, Response};

/// A request as seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
}

impl RecordedRequest {
    /// The request body parsed as JSON.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_str(b).ok())
    }
}

/// Scripted outcome of one request.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// A buffered response. On a streaming request a non-2xx status is
    /// reported as [`HttpError::Status`] and a 2xx body is streamed as one
    /// chunk.
    Success(Response),
    /// The request fails before any response.
    Error(HttpError),
    /// A 200 whose body arrives as these chunks.
    Stream(Vec<Bytes>),
    /// Chunks followed by a mid-stream failure.
    StreamThenError(Vec<Bytes>, HttpError),
}

impl MockResponse {
    pub fn status(status: u16, body: &str) -> Self {
        MockResponse::Success(Response::new(status, Bytes::from(body.to_string())))
    }

    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        MockResponse::Success(Response::new(status, Bytes::from(body.to_string())))
    }

    /// A stream made of the given text chunks.
    pub fn stream<I, T>(chunks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        MockResponse::Stream(
            chunks
                .into_iter()
                .map(|c| Bytes::from(c.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockHttpClient {
    responses: Arc<Mutex<HashMap<String, VecDeque<MockResponse>>>>,
    default_response: Arc<Mutex<Option<MockResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every scripted response for `url` with `response`.
    pub fn set_response(&self, url: &str, response: MockResponse) {
        let mut responses = self.responses.lock().unwrap();
        responses.insert(url.to_string(), VecDeque::from([response]));
    }

    /// Queue `response` after those already scripted for `url`.
    pub fn push_response(&self, url: &str, response: MockResponse) {
        let mut responses = self.responses.lock().unwrap();
        responses
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn set_default_response(&self, response: MockResponse) {
        let mut default = self.default_response.lock().unwrap();
        *default = Some(response);
    }

    pub fn get_requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    pub fn clear_responses(&self) {
        self.responses.lock().unwrap().clear();
    }

    fn record_request(&self, method: &str, url: &str, headers: &Headers, body: Option<String>) {
        let mut requests = self.requests.lock().unwrap();
        requests.push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.clone(),
            body,
        });
    }

    fn next_from(queue: &mut VecDeque<MockResponse>) -> Option<MockResponse> {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn get_response(&self, url: &str) -> Option<MockResponse> {
        let mut responses = self.responses.lock().unwrap();

        // First try exact match
        if let Some(queue) = responses.get_mut(url) {
            return Self::next_from(queue);
        }

        // Then try prefix match (for URL patterns)
        let prefix = responses
            .keys()
            .filter(|pattern| url.starts_with(pattern.as_str()))
            .max_by_key(|pattern| pattern.len())
            .cloned();
        if let Some(pattern) = prefix {
            if let Some(queue) = responses.get_mut(&pattern) {
                return Self::next_from(queue);
            }
        }

        // Finally use default
        let default = self.default_response.lock().unwrap();
        default.clone()
    }

    fn buffered(&self, url: &str) -> Result<Response, HttpError> {
        match self.get_response(url) {
            Some(MockResponse::Success(response)) => Ok(response),
            Some(MockResponse::Error(err)) => Err(err),
            Some(MockResponse::Stream(chunks)) | Some(MockResponse::StreamThenError(chunks, _)) => {
                let body: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
                Ok(Response::new(200, Bytes::from(body)))
            }
            None => Err(HttpError::Other(format!("No mock response for URL: {}", url))),
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.record_request("GET", url, headers, None);
        self.buffered(url)
    }

    async fn post(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.record_request("POST", url, headers, Some(body.to_string()));
        self.buffered(url)
    }

    async fn post_stream(
        &self,
        url: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<ByteStream, HttpError> {
        self.record_request("POST", url, headers, Some(body.to_string()));

        match self.get_response(url) {
            Some(MockResponse::Stream(chunks)) => {
                Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
            }
            Some(MockResponse::StreamThenError(chunks, err)) => {
                let items = chunks
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(err)));
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Some(MockResponse::Success(response)) if !response.is_success() => {
                Err(HttpError::Status {
                    status: response.status,
                    body: response.text(),
                })
            }
            Some(MockResponse::Success(response)) => Ok(Box::pin(futures::stream::iter(
                std::iter::once(Ok(response.body)),
            ))),
            Some(MockResponse::Error(err)) => Err(err),
            None => Err(HttpError::Other(format!("No mock response for URL: {}", url))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_get_with_response() {
        let client = MockHttpClient::new();
        client.set_response("https://example.com/test", MockResponse::status(200, "Hello"));

        let response = client
            .get("https://example.com/test", &Headers::new())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from("Hello"));

        let requests = client.get_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "GET");
    }

    #[tokio::test]
    async fn test_queued_responses_served_in_order() {
        let client = MockHttpClient::new();
        let url = "https://api.test/v1/messages";
        client.push_response(url, MockResponse::status(429, "slow down"));
        client.push_response(url, MockResponse::status(200, "ok"));

        let first = client.post(url, "{}", &Headers::new()).await.unwrap();
        let second = client.post(url, "{}", &Headers::new()).await.unwrap();
        let third = client.post(url, "{}", &Headers::new()).await.unwrap();

        assert_eq!(first.status, 429);
        assert_eq!(second.status, 200);
        assert_eq!(third.status, 200);
        assert_eq!(client.request_count(), 3);
    }

    #[tokio::test]
    async fn test_post_stream_with_chunks() {
        let client = MockHttpClient::new();
        client.set_response(
            "https://example.com/stream",
            MockResponse::stream(["chunk1", "chunk2"]),
        );

        let mut stream = client
            .post_stream("https://example.com/stream", "{}", &Headers::new())
            .await
            .unwrap();

        let mut chunks = Vec::new();
        while let Some(result) = stream.next().await {
            chunks.push(result.unwrap());
        }
        assert_eq!(chunks, vec![Bytes::from("chunk1"), Bytes::from("chunk2")]);
    }

    #[tokio::test]
    async fn test_post_stream_error_status() {
        let client = MockHttpClient::new();
        client.set_response("https://example.com/stream", MockResponse::status(503, "down"));

        let result = client
            .post_stream("https://example.com/stream", "{}", &Headers::new())
            .await;

        match result {
            Err(HttpError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "down");
            }
            _ => panic!("Expected Status error"),
        }
    }

    #[tokio::test]
    async fn test_stream_then_error() {
        let client = MockHttpClient::new();
        client.set_response(
            "https://example.com/stream",
            MockResponse::StreamThenError(
                vec![Bytes::from("a")],
                HttpError::Io("reset".into()),
            ),
        );
        let stream = client
            .post_stream("https://example.com/stream", "{}", &Headers::new())
            .await
            .unwrap();
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_prefix_match_and_default() {
        let client = MockHttpClient::new();
        client.set_response("https://example.com/", MockResponse::status(200, "prefix"));
        client.set_default_response(MockResponse::status(404, "Not Found"));

        let prefixed = client
            .get("https://example.com/anything", &Headers::new())
            .await
            .unwrap();
        let other = client
            .get("https://other.com/", &Headers::new())
            .await
            .unwrap();

        assert_eq!(prefixed.text(), "prefix");
        assert_eq!(other.status, 404);
    }

    #[tokio::test]
    async fn test_no_response_configured() {
        let client = MockHttpClient::new();
        let result = client.get("https://example.com/missing", &Headers::new()).await;
        assert!(matches!(result, Err(HttpError::Other(_))));
    }

    #[tokio::test]
    async fn test_headers_and_body_recorded() {
        let client = MockHttpClient::new();
        client.set_default_response(MockResponse::status(200, ""));

        let mut headers = Headers::new();
        headers.insert("x-api-key".to_string(), "sk-test".to_string());
        client
            .post("https://example.com", r#"{"model":"m"}"#, &headers)
            .await
            .unwrap();

        let requests = client.get_requests();
        assert_eq!(requests[0].headers.get("x-api-key").map(String::as_str), Some("sk-test"));
        assert_eq!(requests[0].json_body().unwrap()["model"], "m");

        client.clear_requests();
        assert!(client.get_requests().is_empty());
    }
}
