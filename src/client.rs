//! HTTP client orchestrating interceptors, retries, caching and cancellation.
//!
//! The [`Client`] type is the main entry point for making HTTP requests.
//! Use [`ClientBuilder`] to configure and create clients.

use crate::cache::{CacheConfig, ResponseCache};
use crate::cancel::CancellationRegistry;
use crate::config::{Classification, ClientType, Config, ConfigError};
use crate::error::panic_message;
use crate::interceptors::{CacheInterceptor, CallContext, Interceptor, InterceptorChain, LoggingInterceptor, LoggingOptions};
use crate::progress::{ProgressCallback, ProgressReporter};
use crate::request::{Body, FilePart, Multipart};
use crate::retry::{Attempted, RetryConfig, RetryEngine};
use crate::transport::{DispatchContext, DownloadStream, ReqwestTransport, Transport};
use crate::{Error, ErrorKind, Request, Response, Result};
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use url::Url;

type SuccessCallback = Box<dyn FnOnce(&Response) + Send>;
type ErrorCallback = Box<dyn FnOnce(&Error) + Send>;
type StatusCallback = Box<dyn FnOnce(StatusCode, &Result<Response>) + Send>;

static INSTANCE: Lazy<RwLock<Option<Client>>> = Lazy::new(|| RwLock::new(None));

/// An HTTP client with interceptors, retries, an optional response cache and
/// cancellation by key.
///
/// The client is designed to be reused across many calls and cloned freely;
/// clones share the connection pool, the cache and the cancellation registry.
///
/// # Examples
///
/// ```no_run
/// use callguard::{CallOptions, Client};
/// use serde::Deserialize;
/// use std::time::Duration;
///
/// #[derive(Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .receive_timeout(Duration::from_secs(10))
///     .max_retries(3)
///     .enable_logging()
///     .build()?;
///
/// let options = CallOptions::new()
///     .cancel_key("profile")
///     .on_status(404, |_, _| eprintln!("no such user"));
///
/// match client.get("/users/123", options).await {
///     Ok(response) => {
///         let user: User = response.json()?;
///         println!("{} after {} attempt(s)", user.name, response.attempts);
///     }
///     Err(e) if e.is_cancelled() => println!("cancelled"),
///     Err(e) => println!("failed: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Config,
    transport: Arc<dyn Transport>,
    chain: InterceptorChain,
    // Same as `chain` minus the cache; streamed transfers never hit the cache.
    stream_chain: InterceptorChain,
    registry: CancellationRegistry,
    error_codes: Arc<BTreeSet<u16>>,
    cache: Option<Arc<ResponseCache>>,
}

/// Per-call options: request shaping, callbacks and the cancellation key.
///
/// # Examples
///
/// ```
/// use callguard::CallOptions;
/// use std::time::Duration;
///
/// let options = CallOptions::new()
///     .header("x-trace", "abc")
///     .query("page", "2")
///     .timeout(Duration::from_secs(5))
///     .cancel_key("search")
///     .on_success(|response| println!("got {}", response.status))
///     .on_error(|error| eprintln!("failed: {}", error));
/// ```
#[derive(Default)]
pub struct CallOptions {
    headers: HeaderMap,
    invalid_header: Option<String>,
    query: Vec<(String, String)>,
    timeout: Option<Duration>,
    cancel_key: Option<String>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    on_status: HashMap<u16, StatusCallback>,
    on_progress: Option<ProgressCallback>,
}

impl CallOptions {
    /// Options with nothing set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header, overriding any client default of the same name.
    ///
    /// An invalid name or value fails the call with [`ErrorKind::Unknown`](crate::ErrorKind::Unknown).
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        match (HeaderName::try_from(name), HeaderValue::try_from(value.as_ref())) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) => self.invalid_header = Some(format!("invalid header name {:?}: {}", name, e)),
            (_, Err(e)) => self.invalid_header = Some(format!("invalid value for header {:?}: {}", name, e)),
        }
        self
    }

    /// Appends a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Overrides the client's receive timeout for this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Registers the call under `key` so it can be cancelled with
    /// [`Client::cancel`].
    pub fn cancel_key(mut self, key: impl Into<String>) -> Self {
        self.cancel_key = Some(key.into());
        self
    }

    /// Called with the final response before the call returns.
    pub fn on_success(mut self, callback: impl FnOnce(&Response) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    /// Called with the final error before the call returns.
    pub fn on_error(mut self, callback: impl FnOnce(&Error) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Called when the call ends with status `code`, after `on_success` or
    /// `on_error`.
    pub fn on_status(
        mut self,
        code: u16,
        callback: impl FnOnce(StatusCode, &Result<Response>) + Send + 'static,
    ) -> Self {
        self.on_status.insert(code, Box::new(callback));
        self
    }

    /// Receives `(bytes so far, total if known)` during downloads and uploads.
    ///
    /// Runs on its own task and never holds up the transfer; rapid updates
    /// may be coalesced.
    pub fn on_progress(mut self, callback: impl Fn(u64, Option<u64>) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Invokes the callbacks matching `result`. A panicking callback is
    /// logged and otherwise ignored.
    fn settle(self, result: Result<Response>) -> Result<Response> {
        let CallOptions {
            on_success,
            on_error,
            mut on_status,
            ..
        } = self;

        match &result {
            Ok(response) => {
                if let Some(callback) = on_success {
                    guard("on_success", || callback(response));
                }
            }
            Err(error) => {
                if let Some(callback) = on_error {
                    guard("on_error", || callback(error));
                }
            }
        }

        let status = match &result {
            Ok(response) => Some(response.status),
            Err(error) => error.status(),
        };
        if let Some(status) = status {
            if let Some(callback) = on_status.remove(&status.as_u16()) {
                guard("on_status", || callback(status, &result));
            }
        }

        result
    }
}

fn guard(name: &str, callback: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
        tracing::error!(callback = name, panic = %panic_message(payload.as_ref()), "Callback panicked");
    }
}

/// Options for [`Client::upload_file`].
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// HTTP method, `POST` by default.
    pub method: Method,
    /// Form field carrying the file, `file` by default.
    pub field_name: String,
    /// File name sent to the server; defaults to the file's own name.
    pub file_name: Option<String>,
    /// Content type of the file part.
    pub content_type: Option<String>,
    /// Extra text fields sent with the file.
    pub fields: Vec<(String, String)>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            method: Method::POST,
            field_name: "file".to_string(),
            file_name: None,
            content_type: None,
            fields: Vec::new(),
        }
    }
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Builds a client from a complete configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is inconsistent or the HTTP
    /// transport cannot be created.
    pub fn from_config(config: Config) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let transport = ReqwestTransport::new(config.client_type, config.connect_timeout)?;
        Ok(Self::assemble(config, Arc::new(transport)))
    }

    fn assemble(config: Config, transport: Arc<dyn Transport>) -> Self {
        let mut interceptors = config.interceptors.clone();
        if let Some(options) = &config.logging {
            interceptors.push(Arc::new(LoggingInterceptor::new(options.clone())));
        }
        let stream_chain = InterceptorChain::new(interceptors.clone());

        let cache = config
            .cache
            .clone()
            .map(|cache_config| Arc::new(ResponseCache::new(cache_config)));
        if let Some(cache) = &cache {
            interceptors.push(Arc::new(CacheInterceptor::new(cache.clone())));
        }

        tracing::debug!(
            transport = transport.name(),
            interceptors = interceptors.len(),
            cache = cache.is_some(),
            "Client created"
        );

        Self {
            inner: Arc::new(ClientInner {
                error_codes: Arc::new(config.error_codes.clone()),
                config,
                transport,
                chain: InterceptorChain::new(interceptors),
                stream_chain,
                registry: CancellationRegistry::new(),
                cache,
            }),
        }
    }

    /// The process-wide default client, created with [`Config::default`] on
    /// first use unless [`set_instance`](Client::set_instance) installed one.
    ///
    /// Independently configured clients can still be created at any time.
    pub fn instance() -> std::result::Result<Client, ConfigError> {
        if let Some(client) = INSTANCE
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
        {
            return Ok(client.clone());
        }

        let mut slot = INSTANCE.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::from_config(Config::default())?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Replaces the process-wide default client.
    pub fn set_instance(client: Client) {
        *INSTANCE.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(client);
    }

    /// The configuration this client was built from.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The response cache, if caching is enabled.
    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.inner.cache.as_ref()
    }

    /// Names of the interceptors in the order they run.
    pub fn interceptor_names(&self) -> Vec<String> {
        self.inner.chain.names()
    }

    /// Cancels every in-flight call registered under `key`. A no-op if there
    /// is none.
    pub fn cancel(&self, key: &str) {
        self.inner.registry.cancel(key);
    }

    /// Cancels every in-flight call.
    pub fn cancel_all(&self) {
        self.inner.registry.cancel_all();
    }

    /// Number of distinct cancel keys with calls in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.registry.len()
    }

    /// Sends `request` through the full pipeline.
    ///
    /// The request URL may be absolute or relative to the base URL. Client
    /// default headers apply unless the request or `options` set the same
    /// header.
    ///
    /// Callbacks in `options` have completed by the time this returns.
    pub async fn send(&self, request: Request, options: CallOptions) -> Result<Response> {
        let transport = self.inner.transport.clone();
        self.execute(request, options, &self.inner.chain, move |request, ctx| {
            let transport = transport.clone();
            async move { transport.execute(request, &ctx).await }
        })
        .await
    }

    /// Sends a GET request.
    pub async fn get(&self, url: &str, options: CallOptions) -> Result<Response> {
        self.send(Request::new(Method::GET, url), options).await
    }

    /// Sends a HEAD request.
    pub async fn head(&self, url: &str, options: CallOptions) -> Result<Response> {
        self.send(Request::new(Method::HEAD, url), options).await
    }

    /// Sends a DELETE request.
    pub async fn delete(&self, url: &str, options: CallOptions) -> Result<Response> {
        self.send(Request::new(Method::DELETE, url), options).await
    }

    /// Sends a POST request with `body`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use callguard::{Body, CallOptions, Client};
    /// use serde_json::json;
    ///
    /// # async fn example(client: Client) -> callguard::Result<()> {
    /// let body = Body::json(&json!({ "name": "Alice" }))?;
    /// let created = client.post("/users", body, CallOptions::new()).await?;
    /// println!("created: {}", created.text());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn post(&self, url: &str, body: impl Into<Body>, options: CallOptions) -> Result<Response> {
        self.send(Request::new(Method::POST, url).with_body(body), options)
            .await
    }

    /// Sends a PUT request with `body`.
    pub async fn put(&self, url: &str, body: impl Into<Body>, options: CallOptions) -> Result<Response> {
        self.send(Request::new(Method::PUT, url).with_body(body), options)
            .await
    }

    /// Sends a PATCH request with `body`.
    pub async fn patch(&self, url: &str, body: impl Into<Body>, options: CallOptions) -> Result<Response> {
        self.send(Request::new(Method::PATCH, url).with_body(body), options)
            .await
    }

    /// Downloads `url` into the file at `path`.
    ///
    /// The body is streamed to disk as it arrives; the file is truncated at
    /// the start of every attempt, so a retried download never appends to a
    /// partial one. The returned response has an empty body. Downloads
    /// bypass the response cache.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use callguard::{CallOptions, Client};
    ///
    /// # async fn example(client: Client) -> callguard::Result<()> {
    /// let options = CallOptions::new().on_progress(|done, total| match total {
    ///     Some(total) => println!("{}/{} bytes", done, total),
    ///     None => println!("{} bytes", done),
    /// });
    /// client.download("/exports/report.csv", "report.csv", options).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn download(
        &self,
        url: &str,
        path: impl AsRef<Path>,
        options: CallOptions,
    ) -> Result<Response> {
        let transport = self.inner.transport.clone();
        let config = &self.inner.config;
        let path = path.as_ref().to_path_buf();
        self.execute(
            Request::new(Method::GET, url),
            options,
            &self.inner.stream_chain,
            move |request, ctx| {
                let transport = transport.clone();
                let path = path.clone();
                async move { receive_to_file(transport.as_ref(), config, request, &ctx, &path).await }
            },
        )
        .await
    }

    /// Uploads the file at `path` as a multipart form.
    pub async fn upload_file(
        &self,
        url: &str,
        path: impl AsRef<Path>,
        upload: UploadOptions,
        options: CallOptions,
    ) -> Result<Response> {
        let path = path.as_ref();
        let data = match tokio::fs::read(path).await {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                let error = Error::unknown(format!("failed to read {}: {}", path.display(), e))
                    .with_request(Arc::new(Request::new(upload.method.clone(), url)));
                return options.settle(Err(error));
            }
        };

        let file_name = upload.file_name.unwrap_or_else(|| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string())
        });
        let body = Body::Multipart(Multipart {
            fields: upload.fields,
            file: FilePart {
                field_name: upload.field_name,
                file_name,
                content_type: upload.content_type,
                data,
            },
        });

        let transport = self.inner.transport.clone();
        self.execute(
            Request::new(upload.method, url).with_body(body),
            options,
            &self.inner.stream_chain,
            move |request, ctx| {
                let transport = transport.clone();
                async move { transport.execute(request, &ctx).await }
            },
        )
        .await
    }

    /// Runs one logical call: prepare, register, retry loop, response phase,
    /// release, callbacks.
    async fn execute<F, Fut>(
        &self,
        request: Request,
        mut options: CallOptions,
        chain: &InterceptorChain,
        dispatch: F,
    ) -> Result<Response>
    where
        F: FnMut(Arc<Request>, DispatchContext) -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        let started = Instant::now();
        let request = match self.prepare(request, &options) {
            Ok(request) => request,
            Err(error) => return options.settle(Err(error)),
        };

        let cancel_key = request
            .cancel_key()
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let handle = self.inner.registry.register(cancel_key.clone());
        let ctx = CallContext::for_call(
            cancel_key,
            self.inner.config.retry.max_retries,
            self.inner.error_codes.clone(),
        );

        let (reporter, progress_task) = match options.on_progress.take() {
            Some(callback) => {
                let (reporter, task) = ProgressReporter::spawn(callback);
                (Some(reporter), Some(task))
            }
            None => (None, None),
        };
        let template = DispatchContext {
            cancel: handle.token().clone(),
            receive_timeout: Some(request.timeout().unwrap_or(self.inner.config.receive_timeout)),
            progress: reporter,
            attempt: 1,
        };

        let engine = RetryEngine {
            config: &self.inner.config,
            chain,
        };
        let attempted = engine
            .run(&ctx, request, handle.token(), template, dispatch)
            .await;

        let result = match attempted {
            Attempted::Dispatched(response) => {
                ctx.set_dispatched(response.clone());
                self.respond(&ctx, chain, response).await
            }
            Attempted::ShortCircuited(response) => self.respond(&ctx, chain, response).await,
            Attempted::Failed(error) => Err(error),
        };
        let result = result.map(|mut response| {
            response.latency = started.elapsed();
            response
        });

        handle.release();
        if let Some(task) = progress_task {
            task.finish().await;
        }

        match &result {
            Ok(response) => tracing::info!(
                status = response.status.as_u16(),
                latency_ms = response.latency.as_millis() as u64,
                attempts = response.attempts,
                from_cache = response.from_cache,
                cancel_key = %ctx.cancel_key(),
                "Received HTTP response"
            ),
            Err(error) => tracing::warn!(
                error = %error,
                attempts = error.attempts(),
                cancel_key = %ctx.cancel_key(),
                "HTTP call failed"
            ),
        }

        options.settle(result)
    }

    /// Runs the response phase once for the final response.
    async fn respond(
        &self,
        ctx: &CallContext,
        chain: &InterceptorChain,
        response: Response,
    ) -> Result<Response> {
        let request = response.request.clone();
        let attempts = response.attempts;
        match chain.on_response(ctx, &request, response).await {
            Ok(response) => Ok(response),
            Err(error) => {
                let error = error.with_request(request.clone()).with_attempts(attempts);
                // Nothing is retried after the response phase.
                let _ = chain.on_error(ctx, &request, &error, ctx.attempt()).await;
                Err(error)
            }
        }
    }

    fn prepare(&self, request: Request, options: &CallOptions) -> Result<Request> {
        if let Some(message) = &options.invalid_header {
            return Err(Error::unknown(message.clone()).with_request(Arc::new(request)));
        }

        let mut url = match self.inner.config.resolve_url(request.url()) {
            Ok(url) => url,
            Err(error) => return Err(error.with_request(Arc::new(request))),
        };
        append_query(&mut url, &options.query);

        let headers = merge_headers(
            &merge_headers(&self.inner.config.default_headers, request.headers()),
            &options.headers,
        );

        let mut prepared = request.with_url(url.as_str()).with_header_map(headers);
        if let Some(timeout) = options.timeout {
            prepared = prepared.with_timeout(timeout);
        }
        if let Some(key) = &options.cancel_key {
            prepared = prepared.with_cancel_key(key.clone());
        }
        Ok(prepared)
    }
}

fn append_query(url: &mut Url, query: &[(String, String)]) {
    if query.is_empty() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for (key, value) in query {
        pairs.append_pair(key, value);
    }
}

/// `overrides` replace every value of a header name they mention.
fn merge_headers(defaults: &HeaderMap, overrides: &HeaderMap) -> HeaderMap {
    let mut merged = defaults.clone();
    for name in overrides.keys() {
        merged.remove(name);
    }
    for (name, value) in overrides {
        merged.append(name.clone(), value.clone());
    }
    merged
}

async fn receive_to_file(
    transport: &dyn Transport,
    config: &Config,
    request: Arc<Request>,
    ctx: &DispatchContext,
    path: &Path,
) -> Result<Response> {
    let DownloadStream {
        status,
        headers,
        content_length,
        mut chunks,
    } = transport.download(request.clone(), ctx).await?;

    // Error bodies are kept in memory for the error value, not written out.
    if config.classify(status) == Classification::Error {
        let mut body = BytesMut::new();
        while let Some(chunk) = next_chunk(&mut chunks, ctx.receive_timeout).await? {
            body.extend_from_slice(&chunk);
        }
        return Ok(Response::new(status, headers, body.freeze(), request));
    }

    let io_error = |e: std::io::Error| Error::unknown(format!("failed to write {}: {}", path.display(), e));
    let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
    let mut received = 0u64;

    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Err(Error::cancelled("download cancelled while in flight"));
            }
            next = next_chunk(&mut chunks, ctx.receive_timeout) => next?,
        };
        let Some(chunk) = next else {
            break;
        };
        file.write_all(&chunk).await.map_err(io_error)?;
        received += chunk.len() as u64;
        if let Some(reporter) = &ctx.progress {
            reporter.report(received, content_length);
        }
    }
    file.flush().await.map_err(io_error)?;

    tracing::debug!(path = %path.display(), bytes = received, "Download written");
    Ok(Response::new(status, headers, Bytes::new(), request))
}

/// The next body chunk, failing with a receive timeout when none arrives
/// within `idle`.
async fn next_chunk(
    chunks: &mut BoxStream<'static, Result<Bytes>>,
    idle: Option<Duration>,
) -> Result<Option<Bytes>> {
    let next = match idle {
        Some(idle) => tokio::time::timeout(idle, chunks.next())
            .await
            .map_err(|_| Error::new(ErrorKind::ReceiveTimeout, format!("no data received for {:?}", idle)))?,
        None => chunks.next().await,
    };
    next.transpose()
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use callguard::cache::CacheConfig;
/// use callguard::interceptors::AuthInterceptor;
/// use callguard::ClientBuilder;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), callguard::ConfigError> {
/// let client = ClientBuilder::new()
///     .base_url("https://api.example.com")?
///     .default_header("User-Agent", "my-app/1.0")?
///     .retry_delay(Duration::from_millis(200))
///     .interceptor(AuthInterceptor::bearer("token"))
///     .cache(CacheConfig::default())
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    config: Config,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            transport: None,
        }
    }

    /// Sets the base URL that relative request URLs are joined to.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> std::result::Result<Self, ConfigError> {
        self.config.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a header sent with every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> std::result::Result<Self, ConfigError> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| ConfigError::InvalidHeader(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| ConfigError::InvalidHeader(format!("Invalid header value: {}", e)))?;
        self.config.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the default receive timeout.
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.config.receive_timeout = timeout;
        self
    }

    /// Replaces the set of status codes classified as success.
    pub fn success_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.config.success_codes = codes.into_iter().collect();
        self
    }

    /// Replaces the set of status codes classified as error.
    pub fn error_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.config.error_codes = codes.into_iter().collect();
        self
    }

    /// Replaces the whole retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Sets the maximum number of retries after the first attempt.
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.config.retry.max_retries = max_retries;
        self
    }

    /// Sets the base retry delay.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry.retry_delay = delay;
        self
    }

    /// Turns exponential backoff on or off.
    pub fn exponential_backoff(mut self, enabled: bool) -> Self {
        self.config.retry.exponential_backoff = enabled;
        self
    }

    /// Replaces the set of status codes worth retrying.
    pub fn retry_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.config.retry.retry_status_codes = codes.into_iter().collect();
        self
    }

    /// Appends an interceptor. Interceptors run in the order they are added,
    /// before the built-in logging and cache interceptors.
    pub fn interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.config.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Enables the logging interceptor with default options.
    pub fn enable_logging(self) -> Self {
        self.logging(LoggingOptions::default())
    }

    /// Enables the logging interceptor with `options`.
    pub fn logging(mut self, options: LoggingOptions) -> Self {
        self.config.logging = Some(options);
        self
    }

    /// Enables the response cache.
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = Some(cache);
        self
    }

    /// Selects the built-in transport flavour.
    pub fn client_type(mut self, client_type: ClientType) -> Self {
        self.config.client_type = client_type;
        self
    }

    /// Uses `transport` instead of the built-in one.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if success and error codes overlap or the transport
    /// cannot be created.
    pub fn build(self) -> std::result::Result<Client, ConfigError> {
        self.config.validate()?;
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(
                self.config.client_type,
                self.config.connect_timeout,
            )?),
        };
        Ok(Client::assemble(self.config, transport))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
