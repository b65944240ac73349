use super::{DispatchContext, DownloadStream, Transport};
use crate::config::{ClientType, ConfigError};
use crate::progress::ProgressReporter;
use crate::request::{Body, Multipart};
use crate::{Error, ErrorKind, Request, Response, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// [`Transport`] backed by a pooled `reqwest::Client`.
///
/// Watches the dispatch context's cancellation token, so cancelling a call
/// abandons its in-flight exchange.
///
/// The receive timeout is a deadline for the whole exchange of a plain call.
/// Streamed transfers (downloads and multipart uploads) instead fail only
/// when that long passes without progress, so a slow but moving transfer is
/// never cut off.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a transport of the given flavour.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be constructed (for
    /// example when the TLS backend fails to initialize).
    pub fn new(client_type: ClientType, connect_timeout: Duration) -> std::result::Result<Self, ConfigError> {
        let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
        if client_type == ClientType::Http1 {
            builder = builder.http1_only();
        }
        let client = builder
            .build()
            .map_err(|e| ConfigError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an existing `reqwest::Client`.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(
        &self,
        request: &Request,
        ctx: &DispatchContext,
        streamed: bool,
        activity: watch::Sender<()>,
    ) -> Result<reqwest::RequestBuilder> {
        let mut builder = self
            .client
            .request(request.method().clone(), request.url())
            .headers(request.headers().clone());

        if let (false, Some(timeout)) = (streamed, ctx.receive_timeout) {
            builder = builder.timeout(timeout);
        }

        builder = match request.body() {
            None => builder,
            Some(Body::Bytes(bytes)) => builder.body(bytes.clone()),
            Some(Body::Json(value)) => builder.json(value),
            Some(Body::Form(fields)) => builder.form(fields),
            Some(Body::Multipart(multipart)) => {
                builder.multipart(multipart_form(multipart, ctx.progress.clone(), activity)?)
            }
        };

        Ok(builder)
    }

    /// Sends the request and waits for the response headers.
    async fn send(&self, request: &Request, ctx: &DispatchContext, streamed: bool) -> Result<reqwest::Response> {
        let uploading = request.is_upload();
        let streamed = streamed || uploading;
        let (activity, pulses) = watch::channel(());
        let builder = self.build(request, ctx, streamed, activity)?;
        let exchange = async move {
            builder
                .send()
                .await
                .map_err(|e| Error::from_reqwest(&e, uploading))
        };

        match (streamed, ctx.receive_timeout) {
            (true, Some(idle)) => until_cancelled(ctx, until_stalled(idle, pulses, exchange)).await,
            _ => until_cancelled(ctx, exchange).await,
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: Arc<Request>, ctx: &DispatchContext) -> Result<Response> {
        let response = self.send(&request, ctx, false).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = until_cancelled(ctx, async move {
            response
                .bytes()
                .await
                .map_err(|e| Error::from_reqwest(&e, false))
        })
        .await?;

        Ok(Response::new(status, headers, body, request))
    }

    async fn download(&self, request: Arc<Request>, ctx: &DispatchContext) -> Result<DownloadStream> {
        // The body's own stall limit is applied by whoever drains `chunks`.
        let response = self.send(&request, ctx, true).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let content_length = response.content_length();
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::from_reqwest(&e, false)))
            .boxed();

        Ok(DownloadStream {
            status,
            headers,
            content_length,
            chunks,
        })
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }
}

async fn until_cancelled<T>(
    ctx: &DispatchContext,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(Error::cancelled("request cancelled while in flight")),
        result = work => result,
    }
}

/// Runs `exchange` until it finishes or `idle` passes without progress.
///
/// Progress is a pulse on `pulses` from the upload body. Once the body is
/// fully sent its sender is gone, and `idle` then bounds the wait for the
/// response headers.
async fn until_stalled<T>(
    idle: Duration,
    mut pulses: watch::Receiver<()>,
    exchange: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::pin!(exchange);
    let mut sending = true;
    loop {
        tokio::select! {
            result = &mut exchange => return result,
            changed = pulses.changed(), if sending => sending = changed.is_ok(),
            _ = tokio::time::sleep(idle) => {
                return Err(if sending {
                    Error::new(ErrorKind::SendTimeout, format!("upload stalled for {:?}", idle))
                } else {
                    Error::new(ErrorKind::ReceiveTimeout, format!("no response within {:?}", idle))
                });
            }
        }
    }
}

fn multipart_form(
    multipart: &Multipart,
    progress: Option<ProgressReporter>,
    activity: watch::Sender<()>,
) -> Result<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();
    for (name, value) in &multipart.fields {
        form = form.text(name.clone(), value.clone());
    }

    let file = &multipart.file;
    let length = file.data.len() as u64;
    let mut part = reqwest::multipart::Part::stream_with_length(
        reqwest::Body::wrap_stream(chunks_with_progress(file.data.clone(), progress, activity)),
        length,
    )
    .file_name(file.file_name.clone());

    if let Some(content_type) = &file.content_type {
        part = part
            .mime_str(content_type)
            .map_err(|e| Error::unknown(format!("invalid upload content type: {}", e)))?;
    }

    Ok(form.part(file.field_name.clone(), part))
}

/// Splits `data` into chunks. Each pulled chunk is reported to `reporter`
/// and pulses `activity`, which is dropped once the last chunk is pulled.
fn chunks_with_progress(
    data: Bytes,
    reporter: Option<ProgressReporter>,
    activity: watch::Sender<()>,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static {
    let total = data.len() as u64;
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| data.slice(start..(start + UPLOAD_CHUNK_SIZE).min(data.len())))
        .collect();

    let mut activity = (total > 0).then_some(activity);
    let mut sent = 0u64;
    stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        if let Some(reporter) = &reporter {
            reporter.report(sent, Some(total));
        }
        if sent == total {
            activity = None;
        } else if let Some(activity) = &activity {
            activity.send_replace(());
        }
        Ok(chunk)
    })
}
