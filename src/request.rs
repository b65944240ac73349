//! Immutable request values.
//!
//! A [`Request`] is never mutated in place. Interceptors receive an owned copy
//! and return either that copy or a modified one built with the `with_*`
//! methods, so the value a retry re-dispatches is always well defined.

use crate::{Error, Result};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::time::Duration;

/// A request body.
#[derive(Debug, Clone)]
pub enum Body {
    /// Raw bytes sent as-is.
    Bytes(Bytes),
    /// A structured payload sent as JSON.
    Json(serde_json::Value),
    /// URL-encoded form fields.
    Form(Vec<(String, String)>),
    /// A multipart form carrying one file and optional text fields.
    Multipart(Multipart),
}

impl Body {
    /// Serializes `value` into a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Unknown`](crate::ErrorKind::Unknown) error if
    /// `value` cannot be represented as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Body::Json)
            .map_err(|e| Error::unknown(format!("failed to serialize request body: {}", e)))
    }

    /// Bytes that identify this body's content, used for cache fingerprints.
    pub(crate) fn content_bytes(&self) -> Vec<u8> {
        match self {
            Body::Bytes(bytes) => bytes.to_vec(),
            Body::Json(value) => value.to_string().into_bytes(),
            Body::Form(fields) => fields
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&")
                .into_bytes(),
            Body::Multipart(multipart) => {
                let mut out = Vec::with_capacity(multipart.file.data.len() + 64);
                for (k, v) in &multipart.fields {
                    out.extend_from_slice(k.as_bytes());
                    out.push(b'=');
                    out.extend_from_slice(v.as_bytes());
                    out.push(b'&');
                }
                out.extend_from_slice(multipart.file.field_name.as_bytes());
                out.extend_from_slice(&multipart.file.data);
                out
            }
        }
    }

    /// Approximate size of the body in bytes.
    pub fn len(&self) -> usize {
        match self {
            Body::Bytes(bytes) => bytes.len(),
            Body::Multipart(multipart) => multipart.file.data.len(),
            other => other.content_bytes().len(),
        }
    }

    /// Returns `true` if the body carries no content.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Bytes(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Body::Json(value)
    }
}

/// A multipart upload: one file plus optional text fields.
#[derive(Debug, Clone)]
pub struct Multipart {
    /// Text fields sent alongside the file.
    pub fields: Vec<(String, String)>,
    /// The attached file.
    pub file: FilePart,
}

/// A file attached to a multipart upload.
#[derive(Debug, Clone)]
pub struct FilePart {
    /// Form field name the file is sent under.
    pub field_name: String,
    /// File name reported to the server.
    pub file_name: String,
    /// MIME type of the file, if known.
    pub content_type: Option<String>,
    /// File contents.
    pub data: Bytes,
}

/// An HTTP request.
///
/// # Examples
///
/// ```
/// use callguard::Request;
/// use http::Method;
///
/// let request = Request::new(Method::GET, "https://api.example.com/users")
///     .with_header("Accept", "application/json")
///     .unwrap();
///
/// // Header names are case-insensitive and the last write wins.
/// let request = request.with_header("accept", "text/plain").unwrap();
/// assert_eq!(request.header("ACCEPT"), Some("text/plain"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Body>,
    timeout: Option<Duration>,
    cancel_key: Option<String>,
}

impl Request {
    /// Creates a request with no headers and no body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            cancel_key: None,
        }
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The absolute URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value by name, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The request body.
    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Per-request receive timeout, overriding the client default.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The cancellation key this request is registered under.
    pub fn cancel_key(&self) -> Option<&str> {
        self.cancel_key.as_deref()
    }

    /// Returns a copy with the header set, replacing any value of the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::unknown(format!("invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::unknown(format!("invalid header value: {}", e)))?;
        Ok(self.with_header_value(name, value))
    }

    /// Returns a copy with an already validated header set.
    pub fn with_header_value(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns a copy with every header of `headers` set over the existing ones.
    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Returns a copy without the named header.
    pub fn without_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    /// Returns a copy pointing at a different URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Returns a copy with the given body.
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Returns a copy with a per-request receive timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns a copy registered under `key` for cancellation.
    pub fn with_cancel_key(mut self, key: impl Into<String>) -> Self {
        self.cancel_key = Some(key.into());
        self
    }

    pub(crate) fn with_header_map(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub(crate) fn is_upload(&self) -> bool {
        matches!(self.body, Some(Body::Multipart(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_header_is_copy_on_write() {
        let original = Request::new(Method::GET, "https://api.example.com");
        let modified = original
            .clone()
            .with_header("Authorization", "Bearer abc")
            .unwrap();

        assert!(original.header("authorization").is_none());
        assert_eq!(modified.header("authorization"), Some("Bearer abc"));
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let result = Request::new(Method::GET, "https://api.example.com").with_header("bad header", "x");
        assert!(result.is_err());
    }

    #[test]
    fn test_with_headers_overrides_same_name() {
        let mut overrides = HeaderMap::new();
        overrides.insert("x-env", HeaderValue::from_static("prod"));

        let request = Request::new(Method::GET, "https://api.example.com")
            .with_header("X-Env", "dev")
            .unwrap()
            .with_headers(&overrides);

        assert_eq!(request.header("x-env"), Some("prod"));
        assert_eq!(request.headers().len(), 1);
    }

    #[test]
    fn test_json_body() {
        let body = Body::json(&serde_json::json!({"name": "alice"})).unwrap();
        assert_eq!(body.content_bytes(), br#"{"name":"alice"}"#.to_vec());
        assert!(!body.is_empty());
    }
}
