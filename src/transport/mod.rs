//! The transport capability: performing one HTTP exchange.
//!
//! The client never talks to the network itself. It hands each attempt to a
//! [`Transport`], which turns a [`Request`] into a [`Response`] or a classified
//! [`Error`]. [`ReqwestTransport`] is the built-in implementation; tests and
//! embedders can supply their own.

mod reqwest_backend;

pub use reqwest_backend::ReqwestTransport;

use crate::progress::ProgressReporter;
use crate::{Request, Response, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-attempt information passed to the transport.
#[derive(Clone)]
pub struct DispatchContext {
    /// Signalled when the logical call is cancelled. Transports that can
    /// abandon an in-flight exchange should watch it.
    pub cancel: CancellationToken,
    /// Time allowed for the response, already resolved from the request
    /// override and the client default. A deadline for the whole exchange of
    /// a plain call; for streamed transfers, the longest allowed stall.
    pub receive_timeout: Option<Duration>,
    /// Receives transfer progress for streamed bodies: multipart uploads in
    /// the transport, downloads in the client.
    pub progress: Option<ProgressReporter>,
    /// 1-based attempt number.
    pub attempt: usize,
}

impl DispatchContext {
    /// A context with no timeout, no progress reporting and a fresh token.
    pub fn new(attempt: usize) -> Self {
        Self {
            cancel: CancellationToken::new(),
            receive_timeout: None,
            progress: None,
            attempt,
        }
    }
}

/// A response whose body is still being received.
pub struct DownloadStream {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// `Content-Length`, when the server sent one.
    pub content_length: Option<u64>,
    /// Body chunks in arrival order.
    pub chunks: BoxStream<'static, Result<Bytes>>,
}

/// Performs HTTP exchanges on behalf of the client.
///
/// Implementations must classify their own failures into [`Error`](crate::Error)
/// values; the client catches panics, but a panicking transport is reported
/// as [`ErrorKind::Unknown`](crate::ErrorKind::Unknown).
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use bytes::Bytes;
/// use callguard::transport::{DispatchContext, Transport};
/// use callguard::{Request, Response, Result};
/// use http::{HeaderMap, StatusCode};
/// use std::sync::Arc;
///
/// struct AlwaysOk;
///
/// #[async_trait]
/// impl Transport for AlwaysOk {
///     async fn execute(&self, request: Arc<Request>, _ctx: &DispatchContext) -> Result<Response> {
///         Ok(Response::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"ok"), request))
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and reads the whole response.
    async fn execute(&self, request: Arc<Request>, ctx: &DispatchContext) -> Result<Response>;

    /// Sends `request` and returns the response with its body as a stream.
    ///
    /// The default implementation reads the whole body through
    /// [`execute`](Transport::execute) and yields it as a single chunk.
    async fn download(&self, request: Arc<Request>, ctx: &DispatchContext) -> Result<DownloadStream> {
        let response = self.execute(request, ctx).await?;
        let content_length = Some(response.body.len() as u64);
        Ok(DownloadStream {
            status: response.status,
            headers: response.headers,
            content_length,
            chunks: stream::once(async move { Ok(response.body) }).boxed(),
        })
    }

    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "custom"
    }
}
