//! Response values.
//!
//! A [`Response`] is read-only once built. Its body is a reference-counted
//! [`Bytes`] buffer, so a cached response can be handed to many callers without
//! copying and without any of them being able to alter what the others see.

use crate::{Error, Request, Result};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// An HTTP response together with details about how it was obtained.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use callguard::{Request, Response};
/// use http::{HeaderMap, Method, StatusCode};
/// use std::sync::Arc;
///
/// let request = Arc::new(Request::new(Method::GET, "https://api.example.com/users/1"));
/// let response = Response::new(
///     StatusCode::OK,
///     HeaderMap::new(),
///     Bytes::from_static(br#"{"id":1}"#),
///     request,
/// );
///
/// let value: serde_json::Value = response.json().unwrap();
/// assert_eq!(value["id"], 1);
/// assert!(!response.was_retried());
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    /// The HTTP status code.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// The raw response body.
    pub body: Bytes,

    /// The request this response answers.
    pub request: Arc<Request>,

    /// When the response was received from the transport.
    pub received_at: SystemTime,

    /// Time from the start of the call to the final response.
    pub latency: Duration,

    /// Number of transport dispatches the call made.
    ///
    /// `1` for a first-try success, `0` for a response served from cache.
    pub attempts: usize,

    /// Whether this response was served from the response cache.
    pub from_cache: bool,
}

impl Response {
    /// Creates a response received now.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, request: Arc<Request>) -> Self {
        Self {
            status,
            headers,
            body,
            request,
            received_at: SystemTime::now(),
            latency: Duration::ZERO,
            attempts: 1,
            from_cache: false,
        }
    }

    /// Returns `true` if the call needed more than one dispatch.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Unknown`](crate::ErrorKind::Unknown) error that
    /// quotes the start of the raw body when decoding fails.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            Error::unknown(format!(
                "failed to decode response body: {} (body: {})",
                e,
                self.body_preview(200)
            ))
            .with_status(self.status)
            .with_request(self.request.clone())
        })
    }

    /// Approximate memory held by this response.
    pub fn weight(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.as_str().len() + value.len())
            .sum();
        self.body.len() + headers
    }

    /// At most `limit` characters of the body, for messages and logs.
    pub(crate) fn body_preview(&self, limit: usize) -> String {
        truncate(&String::from_utf8_lossy(&self.body), limit)
    }
}

pub(crate) fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
