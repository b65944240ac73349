//! Error types returned by every client operation.
//!
//! Failures never escape a call as panics or foreign error types. Whatever goes
//! wrong (transport, interceptor, classification, cancellation) is converted at
//! the boundary nearest its origin into an [`Error`] carrying one of the
//! [`ErrorKind`]s below.

use crate::{Request, Response};
use futures::FutureExt;
use http::StatusCode;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// The category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Establishing the connection took longer than the connect timeout.
    ConnectionTimeout,
    /// Sending the request body took longer than the allowed time.
    SendTimeout,
    /// Waiting for the response took longer than the receive timeout.
    ReceiveTimeout,
    /// The call was cancelled, either through the cancellation registry or
    /// because a request interceptor aborted it.
    Cancelled,
    /// The server answered with a status classified as an error.
    BadResponse,
    /// The network was unreachable or the connection was reset.
    ConnectionError,
    /// TLS certificate validation failed.
    BadCertificate,
    /// Anything else, including failures raised by interceptors.
    Unknown,
}

impl ErrorKind {
    /// Timeout and connection kinds, which the retry engine treats as
    /// retryable regardless of status code policy.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionTimeout
                | ErrorKind::SendTimeout
                | ErrorKind::ReceiveTimeout
                | ErrorKind::ConnectionError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ConnectionTimeout => "connection timeout",
            ErrorKind::SendTimeout => "send timeout",
            ErrorKind::ReceiveTimeout => "receive timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::BadResponse => "bad response",
            ErrorKind::ConnectionError => "connection error",
            ErrorKind::BadCertificate => "bad certificate",
            ErrorKind::Unknown => "unknown error",
        };
        f.write_str(name)
    }
}

/// A classified call failure.
///
/// `Error` is a plain value: it is cloned into error interceptors and
/// callbacks, and returned to the caller as the `Err` side of
/// [`Result`]. It keeps the originating request and, for
/// [`ErrorKind::BadResponse`], the full response so nothing the server said is
/// lost.
///
/// # Examples
///
/// ```
/// use callguard::{Error, ErrorKind};
///
/// let err = Error::new(ErrorKind::ReceiveTimeout, "no response within 30s");
/// assert!(err.is_timeout());
/// assert!(!err.is_cancelled());
/// assert_eq!(err.kind(), ErrorKind::ReceiveTimeout);
/// ```
#[derive(thiserror::Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: Option<StatusCode>,
    request: Option<Arc<Request>>,
    response: Option<Response>,
    attempts: usize,
}

impl Error {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            request: None,
            response: None,
            attempts: 0,
        }
    }

    /// A [`ErrorKind::Cancelled`] error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// An [`ErrorKind::Unknown`] error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Wraps a response whose status was classified as an error.
    pub fn bad_response(response: Response) -> Self {
        let status = response.status;
        let preview = response.body_preview(256);
        let message = if preview.is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            format!("HTTP {}: {}", status.as_u16(), preview)
        };
        let request = response.request.clone();
        Self {
            kind: ErrorKind::BadResponse,
            message,
            status: Some(status),
            request: Some(request),
            response: Some(response),
            attempts: 0,
        }
    }

    /// Classifies a `reqwest` failure.
    ///
    /// `sending_body` tells whether the request was streaming an upload, which
    /// turns an otherwise ambiguous timeout into [`ErrorKind::SendTimeout`].
    pub fn from_reqwest(err: &reqwest::Error, sending_body: bool) -> Self {
        let kind = if err.is_timeout() {
            if err.is_connect() {
                ErrorKind::ConnectionTimeout
            } else if sending_body {
                ErrorKind::SendTimeout
            } else {
                ErrorKind::ReceiveTimeout
            }
        } else if mentions_certificate(err) {
            ErrorKind::BadCertificate
        } else if err.is_connect() {
            ErrorKind::ConnectionError
        } else {
            ErrorKind::Unknown
        };

        let mut error = Self::new(kind, err.to_string());
        if let Some(status) = err.status() {
            error.status = Some(status);
        }
        error
    }

    /// Attaches the status code the failure relates to.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Attaches the request that produced the failure, unless one is already set.
    pub fn with_request(mut self, request: Arc<Request>) -> Self {
        if self.request.is_none() {
            self.request = Some(request);
        }
        self
    }

    pub(crate) fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    /// The category of this failure.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The status code involved, if the failure relates to a response.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The request that produced this failure.
    pub fn request(&self) -> Option<&Request> {
        self.request.as_deref()
    }

    /// The full error response for [`ErrorKind::BadResponse`].
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Number of transport dispatches made before the call gave up.
    ///
    /// Zero when the call never reached the transport.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// `true` for any of the three timeout kinds.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConnectionTimeout | ErrorKind::SendTimeout | ErrorKind::ReceiveTimeout
        )
    }

    /// `true` for [`ErrorKind::ConnectionError`].
    pub fn is_connection_error(&self) -> bool {
        self.kind == ErrorKind::ConnectionError
    }

    /// `true` for [`ErrorKind::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// `true` for [`ErrorKind::BadResponse`].
    pub fn is_bad_response(&self) -> bool {
        self.kind == ErrorKind::BadResponse
    }
}

fn mentions_certificate(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        let text = current.to_string().to_ascii_lowercase();
        if text.contains("certificate") || text.contains("invalidcert") {
            return true;
        }
        source = current.source();
    }
    false
}

/// Runs `work`, turning a panic inside it into an [`ErrorKind::Unknown`] error.
pub(crate) async fn catch_panic<T>(origin: &str, work: impl Future<Output = Result<T>>) -> Result<T> {
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(origin = origin, panic = %message, "Caught panic");
            Err(Error::unknown(format!("{} panicked: {}", origin, message)))
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A specialized `Result` type for client operations.
///
/// `Ok` carries the response and `Err` the classified failure; exactly one of
/// the two is ever present.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, Method};

    #[test]
    fn test_transient_kinds() {
        assert!(ErrorKind::ConnectionTimeout.is_transient());
        assert!(ErrorKind::SendTimeout.is_transient());
        assert!(ErrorKind::ReceiveTimeout.is_transient());
        assert!(ErrorKind::ConnectionError.is_transient());
        assert!(!ErrorKind::Cancelled.is_transient());
        assert!(!ErrorKind::BadResponse.is_transient());
        assert!(!ErrorKind::BadCertificate.is_transient());
        assert!(!ErrorKind::Unknown.is_transient());
    }

    #[test]
    fn test_bad_response_keeps_response() {
        let request = Arc::new(Request::new(Method::GET, "https://api.example.com/x"));
        let response = Response::new(
            StatusCode::NOT_FOUND,
            HeaderMap::new(),
            Bytes::from_static(b"missing"),
            request,
        );

        let err = Error::bad_response(response);
        assert!(err.is_bad_response());
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.response().unwrap().text(), "missing");
        assert_eq!(err.request().unwrap().url(), "https://api.example.com/x");
        assert_eq!(err.to_string(), "bad response: HTTP 404: missing");
    }

    #[tokio::test]
    async fn test_catch_panic_converts_to_unknown() {
        let result: Result<()> = catch_panic("interceptor", async {
            if true {
                panic!("boom");
            }
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.message(), "interceptor panicked: boom");
    }

    #[test]
    fn test_with_request_does_not_overwrite() {
        let first = Arc::new(Request::new(Method::GET, "https://a.example.com"));
        let second = Arc::new(Request::new(Method::GET, "https://b.example.com"));
        let err = Error::unknown("boom").with_request(first).with_request(second);
        assert_eq!(err.request().unwrap().url(), "https://a.example.com");
    }
}
