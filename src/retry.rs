//! Retry policy and the per-call retry state machine.
//!
//! A logical call moves through attempts `1..=max_retries + 1`. Each attempt
//! runs the request phase of the interceptor chain, dispatches, and classifies
//! the outcome once. A failed attempt is retried when its status code is in
//! the retryable set, its error kind is a timeout or connection failure, or any
//! interceptor votes for it, and only while the attempt budget lasts.

use crate::config::{Classification, Config};
use crate::error::catch_panic;
use crate::freshness;
use crate::interceptors::{CallContext, InterceptorChain, RequestPhase};
use crate::transport::DispatchContext;
use crate::{Error, Request, Response, Result};
use rand::Rng;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry policy.
///
/// # Examples
///
/// ```
/// use callguard::RetryConfig;
/// use std::time::Duration;
///
/// let retry = RetryConfig {
///     max_retries: 3,
///     retry_delay: Duration::from_millis(100),
///     exponential_backoff: true,
///     ..RetryConfig::default()
/// };
///
/// // 100ms, 200ms, 400ms, then no more retries.
/// assert_eq!(retry.delay_for_attempt(1), Some(Duration::from_millis(100)));
/// assert_eq!(retry.delay_for_attempt(2), Some(Duration::from_millis(200)));
/// assert_eq!(retry.delay_for_attempt(3), Some(Duration::from_millis(400)));
/// assert_eq!(retry.delay_for_attempt(4), None);
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt. `0` disables retries.
    pub max_retries: usize,

    /// Delay before the first retry, and before every retry when
    /// `exponential_backoff` is off.
    pub retry_delay: Duration,

    /// Double the delay after every retry.
    pub exponential_backoff: bool,

    /// Status codes worth retrying.
    pub retry_status_codes: BTreeSet<u16>,

    /// Upper bound for a single delay.
    pub max_delay: Option<Duration>,

    /// Scale each delay by a random factor between 0.5 and 1.0.
    pub jitter: bool,

    /// Use the server's `Retry-After` header, when present, instead of the
    /// computed delay.
    pub respect_retry_after: bool,

    /// Upper bound for a `Retry-After` delay.
    pub max_retry_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            exponential_backoff: true,
            retry_status_codes: [408, 429, 500, 502, 503, 504].into_iter().collect(),
            max_delay: None,
            jitter: false,
            respect_retry_after: false,
            max_retry_after: Duration::from_secs(300),
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Returns the delay to wait after failed attempt `attempt` (1-indexed), or
    /// `None` if the retry budget is spent.
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }

        let delay = if self.exponential_backoff {
            // retry_delay * 2^(attempt - 1)
            let multiplier = 2u64.saturating_pow(attempt.saturating_sub(1) as u32);
            self.retry_delay
                .saturating_mul(multiplier.try_into().unwrap_or(u32::MAX))
        } else {
            self.retry_delay
        };

        let delay = match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        };

        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            Some(delay.mul_f64(factor))
        } else {
            Some(delay)
        }
    }

    /// Whether policy alone makes `error` retryable, ignoring interceptor votes
    /// and the attempt budget.
    pub fn is_retryable(&self, error: &Error) -> bool {
        if error.is_cancelled() {
            return false;
        }
        if error.kind().is_transient() {
            return true;
        }
        error
            .status()
            .is_some_and(|status| self.retry_status_codes.contains(&status.as_u16()))
    }

    fn delay_after(&self, attempt: usize, error: &Error) -> Option<Duration> {
        let computed = self.delay_for_attempt(attempt)?;
        if self.respect_retry_after {
            if let Some(server) = error
                .response()
                .and_then(|response| freshness::retry_after(&response.headers))
            {
                return Some(server.min(self.max_retry_after));
            }
        }
        Some(computed)
    }
}

/// Outcome of the retry loop, before the response phase runs.
pub(crate) enum Attempted {
    /// A success-classified response from the transport.
    Dispatched(Response),
    /// A response supplied by a request interceptor; no dispatch happened.
    ShortCircuited(Response),
    /// The terminal failure.
    Failed(Error),
}

/// Drives one logical call through its attempts.
pub(crate) struct RetryEngine<'a> {
    pub(crate) config: &'a Config,
    pub(crate) chain: &'a InterceptorChain,
}

impl RetryEngine<'_> {
    pub(crate) async fn run<F, Fut>(
        &self,
        ctx: &CallContext,
        request: Request,
        cancel: &CancellationToken,
        dispatch_template: DispatchContext,
        mut dispatch: F,
    ) -> Attempted
    where
        F: FnMut(Arc<Request>, DispatchContext) -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        let retry = &self.config.retry;
        let mut current = request;
        let mut attempt = 1;

        loop {
            ctx.set_attempt(attempt);

            let prepared = match self.chain.on_request(ctx, current.clone()).await {
                Ok(RequestPhase::Dispatch(request)) => request,
                Ok(RequestPhase::Respond(response)) => {
                    tracing::debug!(
                        url = %response.request.url(),
                        cancel_key = %ctx.cancel_key(),
                        "Request answered by interceptor"
                    );
                    return Attempted::ShortCircuited(response);
                }
                Err(error) => {
                    let error = error.with_request(Arc::new(current)).with_attempts(attempt - 1);
                    return self.fail(ctx, error, attempt).await;
                }
            };
            current = prepared;
            let request = Arc::new(current.clone());

            if cancel.is_cancelled() {
                let error = Error::cancelled("request cancelled before dispatch")
                    .with_request(request.clone())
                    .with_attempts(attempt - 1);
                return self.fail(ctx, error, attempt).await;
            }

            tracing::debug!(
                method = %request.method(),
                url = %request.url(),
                attempt = attempt,
                "Dispatching HTTP request"
            );

            let mut dispatch_ctx = dispatch_template.clone();
            dispatch_ctx.attempt = attempt;
            let outcome = catch_panic("transport", dispatch(request.clone(), dispatch_ctx)).await;

            // Classified exactly once per attempt.
            let error = match outcome {
                Ok(mut response) => match self.config.classify(response.status) {
                    Classification::Success => {
                        response.attempts = attempt;
                        return Attempted::Dispatched(response);
                    }
                    Classification::Error => Error::bad_response(response),
                },
                Err(error) => error,
            };
            let error = error.with_request(request.clone()).with_attempts(attempt);

            tracing::warn!(
                error = %error,
                attempt = attempt,
                method = %request.method(),
                url = %request.url(),
                "Request attempt failed"
            );

            let forced = self.chain.on_error(ctx, &request, &error, attempt).await;
            let eligible = !error.is_cancelled() && (forced || retry.is_retryable(&error));
            let delay = if eligible {
                retry.delay_after(attempt, &error)
            } else {
                None
            };

            let Some(delay) = delay else {
                return Attempted::Failed(error);
            };

            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                attempt = attempt,
                forced = forced,
                "Retrying request after delay"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    let error = Error::cancelled("request cancelled during retry backoff")
                        .with_request(request)
                        .with_attempts(attempt);
                    return self.fail(ctx, error, attempt).await;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }

    /// Reports a terminal error that no dispatch produced to the error phase.
    async fn fail(&self, ctx: &CallContext, error: Error, attempt: usize) -> Attempted {
        if let Some(request) = error.request() {
            // The vote is irrelevant: nothing is retried after this.
            let _ = self.chain.on_error(ctx, request, &error, attempt).await;
        }
        Attempted::Failed(error)
    }
}
