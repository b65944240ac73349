//! Interceptor hooks for cross-cutting request behavior.
//!
//! An [`Interceptor`] may act at three points of a call, each optional:
//!
//! - [`on_request`](Interceptor::on_request), once per attempt before
//!   dispatch: pass the request on (possibly modified), answer it directly, or
//!   abort the call.
//! - [`on_response`](Interceptor::on_response), once for the final
//!   success-classified response.
//! - [`on_error`](Interceptor::on_error), once per error the call produces; the
//!   return value is a vote for retrying that attempt.
//!
//! Interceptors run in chain order in every phase. A panic inside an
//! interceptor is caught and reported as
//! [`ErrorKind::Unknown`](crate::ErrorKind::Unknown).

mod auth;
mod cache;
mod logging;

pub use auth::{AuthInterceptor, Credential, CredentialProvider};
pub use cache::CacheInterceptor;
pub use logging::{LoggingInterceptor, LoggingOptions};

use crate::error::catch_panic;
use crate::{Error, Request, Response, Result};
use async_trait::async_trait;
use http::StatusCode;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What a request interceptor decided.
#[derive(Debug)]
pub enum RequestAction {
    /// Continue with this request.
    Continue(Request),
    /// Answer the call with this response; nothing is dispatched and the call
    /// is not retried.
    Respond(Response),
    /// Abort the call with an [`ErrorKind::Cancelled`](crate::ErrorKind::Cancelled) error.
    Abort,
}

/// State shared by all interceptors for one logical call.
pub struct CallContext {
    cancel_key: String,
    attempt: AtomicUsize,
    max_retries: usize,
    error_codes: Arc<BTreeSet<u16>>,
    extensions: Mutex<http::Extensions>,
}

/// The last response as the transport produced it, before the response phase.
#[derive(Clone)]
struct Dispatched(Response);

impl CallContext {
    /// A standalone context, mainly useful for exercising an interceptor
    /// directly.
    pub fn new(cancel_key: impl Into<String>) -> Self {
        Self::for_call(cancel_key.into(), 0, Arc::new((400..=599).collect()))
    }

    pub(crate) fn for_call(
        cancel_key: String,
        max_retries: usize,
        error_codes: Arc<BTreeSet<u16>>,
    ) -> Self {
        Self {
            cancel_key,
            attempt: AtomicUsize::new(1),
            max_retries,
            error_codes,
            extensions: Mutex::new(http::Extensions::new()),
        }
    }

    /// The key the call is registered under for cancellation.
    pub fn cancel_key(&self) -> &str {
        &self.cancel_key
    }

    /// The current 1-based attempt number.
    pub fn attempt(&self) -> usize {
        self.attempt.load(Ordering::Acquire)
    }

    pub(crate) fn set_attempt(&self, attempt: usize) {
        self.attempt.store(attempt, Ordering::Release);
    }

    /// The configured retry budget.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Whether `status` classifies as a success: any code not listed as an
    /// error code.
    pub fn is_success(&self, status: StatusCode) -> bool {
        !self.error_codes.contains(&status.as_u16())
    }

    /// The final response exactly as the transport returned it, before any
    /// response interceptor ran. `None` when nothing was dispatched.
    pub fn dispatched(&self) -> Option<Response> {
        self.get::<Dispatched>().map(|Dispatched(response)| response)
    }

    pub(crate) fn set_dispatched(&self, response: Response) {
        self.insert(Dispatched(response));
    }

    /// Stores a per-call value, replacing any previous value of the same type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.extensions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(value)
    }

    /// Returns a copy of the per-call value of type `T`, if one was stored.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.extensions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get::<T>()
            .cloned()
    }
}

/// A hook into the request pipeline. Every method has a pass-through default.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use callguard::interceptors::{CallContext, Interceptor, RequestAction};
/// use callguard::{Request, Result};
///
/// /// Tags every request with the attempt number.
/// struct AttemptHeader;
///
/// #[async_trait]
/// impl Interceptor for AttemptHeader {
///     async fn on_request(&self, ctx: &CallContext, request: Request) -> Result<RequestAction> {
///         let request = request.with_header("x-attempt", ctx.attempt().to_string())?;
///         Ok(RequestAction::Continue(request))
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called before every dispatch. Returning an error ends the call with it.
    async fn on_request(&self, _ctx: &CallContext, request: Request) -> Result<RequestAction> {
        Ok(RequestAction::Continue(request))
    }

    /// Called once with the final success-classified response. Returning an
    /// error ends the call with it.
    async fn on_response(
        &self,
        _ctx: &CallContext,
        _request: &Request,
        response: Response,
    ) -> Result<Response> {
        Ok(response)
    }

    /// Called once for every error the call produces. Returning `true` asks
    /// for the failed attempt to be retried even if policy would not retry
    /// it; the retry budget still applies.
    async fn on_error(
        &self,
        _ctx: &CallContext,
        _request: &Request,
        _error: &Error,
        _attempt: usize,
    ) -> bool {
        false
    }
}

type RequestHook = Box<dyn Fn(Request) -> Option<Request> + Send + Sync>;
type ResponseHook = Box<dyn Fn(&Request, Response) -> Response + Send + Sync>;
type ErrorHook = Box<dyn Fn(&Request, &Error, usize) -> bool + Send + Sync>;

/// An interceptor assembled from plain closures, each optional.
///
/// # Examples
///
/// ```
/// use callguard::interceptors::Hooks;
///
/// let interceptor = Hooks::new("tenant")
///     .on_request(|request| request.with_header("x-tenant", "acme").ok())
///     .on_error(|_request, error, _attempt| error.status().map_or(false, |s| s.as_u16() == 409));
/// ```
pub struct Hooks {
    name: String,
    on_request: Option<RequestHook>,
    on_response: Option<ResponseHook>,
    on_error: Option<ErrorHook>,
}

impl Hooks {
    /// Creates a record with no hooks.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_request: None,
            on_response: None,
            on_error: None,
        }
    }

    /// Sets the request hook. Returning `None` aborts the call.
    pub fn on_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(Request) -> Option<Request> + Send + Sync + 'static,
    {
        self.on_request = Some(Box::new(hook));
        self
    }

    /// Sets the response hook.
    pub fn on_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, Response) -> Response + Send + Sync + 'static,
    {
        self.on_response = Some(Box::new(hook));
        self
    }

    /// Sets the error hook.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, &Error, usize) -> bool + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }
}

#[async_trait]
impl Interceptor for Hooks {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_request(&self, _ctx: &CallContext, request: Request) -> Result<RequestAction> {
        Ok(match &self.on_request {
            Some(hook) => hook(request).map_or(RequestAction::Abort, RequestAction::Continue),
            None => RequestAction::Continue(request),
        })
    }

    async fn on_response(
        &self,
        _ctx: &CallContext,
        request: &Request,
        response: Response,
    ) -> Result<Response> {
        Ok(match &self.on_response {
            Some(hook) => hook(request, response),
            None => response,
        })
    }

    async fn on_error(&self, _ctx: &CallContext, request: &Request, error: &Error, attempt: usize) -> bool {
        self.on_error
            .as_ref()
            .is_some_and(|hook| hook(request, error, attempt))
    }
}

/// Where the request phase left the call.
pub(crate) enum RequestPhase {
    Dispatch(Request),
    Respond(Response),
}

/// An ordered list of interceptors.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    /// Creates a chain running `interceptors` in the given order.
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    /// Number of interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns `true` if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Interceptor names, in order.
    pub fn names(&self) -> Vec<String> {
        self.interceptors.iter().map(|i| i.name().to_string()).collect()
    }

    pub(crate) async fn on_request(&self, ctx: &CallContext, request: Request) -> Result<RequestPhase> {
        let mut current = request;
        for interceptor in &self.interceptors {
            let action = catch_panic(
                "request interceptor",
                interceptor.on_request(ctx, current.clone()),
            )
            .await?;

            match action {
                RequestAction::Continue(next) => current = next,
                RequestAction::Respond(response) => return Ok(RequestPhase::Respond(response)),
                RequestAction::Abort => {
                    tracing::info!(
                        interceptor = interceptor.name(),
                        url = %current.url(),
                        cancel_key = %ctx.cancel_key(),
                        "Request aborted by interceptor"
                    );
                    return Err(Error::cancelled(format!(
                        "request aborted by interceptor {}",
                        interceptor.name()
                    )));
                }
            }
        }
        Ok(RequestPhase::Dispatch(current))
    }

    pub(crate) async fn on_response(
        &self,
        ctx: &CallContext,
        request: &Request,
        response: Response,
    ) -> Result<Response> {
        let mut current = response;
        for interceptor in &self.interceptors {
            current = catch_panic(
                "response interceptor",
                interceptor.on_response(ctx, request, current),
            )
            .await?;
        }
        Ok(current)
    }

    /// Consults every interceptor in order; `true` if any voted to retry.
    pub(crate) async fn on_error(
        &self,
        ctx: &CallContext,
        request: &Request,
        error: &Error,
        attempt: usize,
    ) -> bool {
        let mut retry = false;
        for interceptor in &self.interceptors {
            let vote = catch_panic("error interceptor", async {
                Ok(interceptor.on_error(ctx, request, error, attempt).await)
            })
            .await
            .unwrap_or(false);
            retry |= vote;
        }
        retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, Method};

    fn request() -> Request {
        Request::new(Method::GET, "https://api.example.com/items")
    }

    fn ok_response(request: &Request) -> Response {
        Response::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(b"body"),
            Arc::new(request.clone()),
        )
    }

    struct Panics;

    #[async_trait]
    impl Interceptor for Panics {
        async fn on_request(&self, _ctx: &CallContext, _request: Request) -> Result<RequestAction> {
            panic!("interceptor bug")
        }

        async fn on_error(&self, _: &CallContext, _: &Request, _: &Error, _: usize) -> bool {
            panic!("interceptor bug")
        }
    }

    #[tokio::test]
    async fn test_request_phase_runs_in_order() {
        let chain = InterceptorChain::new(vec![
            Arc::new(Hooks::new("a").on_request(|r| r.with_header("x-order", "a").ok())),
            Arc::new(Hooks::new("b").on_request(|r| {
                let seen = r.header("x-order").unwrap_or_default().to_string();
                r.with_header("x-order", format!("{},b", seen)).ok()
            })),
        ]);

        match chain.on_request(&CallContext::new("k"), request()).await {
            Ok(RequestPhase::Dispatch(r)) => assert_eq!(r.header("x-order"), Some("a,b")),
            _ => panic!("expected dispatch"),
        }
    }

    #[tokio::test]
    async fn test_abort_skips_remaining_interceptors() {
        let chain = InterceptorChain::new(vec![
            Arc::new(Hooks::new("gate").on_request(|_| None)),
            Arc::new(Hooks::new("after").on_request(|_| panic!("must not run"))),
        ]);

        match chain.on_request(&CallContext::new("k"), request()).await {
            Err(e) => {
                assert!(e.is_cancelled());
                assert!(e.message().contains("gate"));
            }
            _ => panic!("expected abort"),
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_unknown_error() {
        let chain = InterceptorChain::new(vec![Arc::new(Panics)]);
        match chain.on_request(&CallContext::new("k"), request()).await {
            Err(e) => assert_eq!(e.kind(), crate::ErrorKind::Unknown),
            _ => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn test_any_vote_forces_retry() {
        let ctx = CallContext::new("k");
        let err = Error::unknown("x");
        let no = InterceptorChain::new(vec![
            Arc::new(Hooks::new("a").on_error(|_, _, _| false)),
            Arc::new(Panics),
        ]);
        assert!(!no.on_error(&ctx, &request(), &err, 1).await);

        let yes = InterceptorChain::new(vec![
            Arc::new(Hooks::new("a").on_error(|_, _, _| false)),
            Arc::new(Hooks::new("b").on_error(|_, _, attempt| attempt < 3)),
        ]);
        assert!(yes.on_error(&ctx, &request(), &err, 1).await);
        assert!(!yes.on_error(&ctx, &request(), &err, 3).await);
    }

    #[tokio::test]
    async fn test_response_phase_in_chain_order() {
        let chain = InterceptorChain::new(vec![
            Arc::new(Hooks::new("a").on_response(|_, mut r| {
                r.body = Bytes::from(format!("{}-a", r.text()));
                r
            })),
            Arc::new(Hooks::new("b").on_response(|_, mut r| {
                r.body = Bytes::from(format!("{}-b", r.text()));
                r
            })),
        ]);

        let req = request();
        let response = chain
            .on_response(&CallContext::new("k"), &req, ok_response(&req))
            .await
            .unwrap();
        assert_eq!(response.text(), "body-a-b");
    }

    #[test]
    fn test_context_extensions() {
        #[derive(Clone, PartialEq, Debug)]
        struct Marker(u32);

        let ctx = CallContext::new("k");
        assert_eq!(ctx.get::<Marker>(), None);
        ctx.insert(Marker(7));
        assert_eq!(ctx.get::<Marker>(), Some(Marker(7)));
    }
}
