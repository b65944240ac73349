//! Response caching as an interceptor.

use super::{CallContext, Interceptor, RequestAction};
use crate::cache::{Fingerprint, ResponseCache};
use crate::freshness::{self, Freshness};
use crate::{Request, Response, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Answers repeated requests from a [`ResponseCache`] and stores fresh
/// success responses in it.
///
/// The fingerprint is taken when the request passes through this interceptor
/// and reused when the response comes back, so interceptors placed after it
/// (which may add headers) do not change the key a response is stored under.
///
/// Only dispatched responses are stored, and they are stored as the transport
/// returned them. A hit therefore passes through the response phase exactly
/// once, like the original. Cache failures never fail the call.
#[derive(Clone)]
pub struct CacheInterceptor {
    cache: Arc<ResponseCache>,
}

impl CacheInterceptor {
    /// Creates an interceptor backed by `cache`.
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }

    /// The backing cache.
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    fn max_age(&self, response: &Response) -> Option<Duration> {
        let age = match freshness::freshness(&response.headers) {
            Freshness::NoStore => return None,
            Freshness::MaxAge(age) => age,
            Freshness::Unspecified => self.cache.config().default_max_age,
        };
        (!age.is_zero()).then_some(age)
    }
}

#[async_trait]
impl Interceptor for CacheInterceptor {
    fn name(&self) -> &str {
        "cache"
    }

    async fn on_request(&self, ctx: &CallContext, request: Request) -> Result<RequestAction> {
        if !self.cache.is_cacheable_method(request.method()) {
            return Ok(RequestAction::Continue(request));
        }

        let fingerprint = self.cache.fingerprint(&request);
        ctx.insert(fingerprint.clone());

        match self.cache.get(&fingerprint) {
            Some(mut hit) => {
                tracing::debug!(
                    url = %request.url(),
                    fingerprint = %fingerprint,
                    "Serving response from cache"
                );
                hit.from_cache = true;
                hit.attempts = 0;
                hit.latency = Duration::ZERO;
                hit.request = Arc::new(request);
                Ok(RequestAction::Respond(hit))
            }
            None => Ok(RequestAction::Continue(request)),
        }
    }

    async fn on_response(
        &self,
        ctx: &CallContext,
        request: &Request,
        response: Response,
    ) -> Result<Response> {
        if response.from_cache || !self.cache.is_cacheable_method(request.method()) {
            return Ok(response);
        }
        let Some(raw) = ctx.dispatched() else {
            return Ok(response);
        };
        if self.cache.config().cache_only_success && !ctx.is_success(raw.status) {
            return Ok(response);
        }
        let Some(max_age) = self.max_age(&raw) else {
            tracing::debug!(url = %request.url(), "Response not cacheable");
            return Ok(response);
        };

        let fingerprint = ctx
            .get::<Fingerprint>()
            .unwrap_or_else(|| self.cache.fingerprint(request));
        self.cache.insert(fingerprint, raw, max_age);
        Ok(response)
    }
}
