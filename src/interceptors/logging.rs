//! Request and response logging as an interceptor.

use super::{CallContext, Interceptor, RequestAction};
use crate::request::Body;
use crate::response::truncate;
use crate::{Error, Request, Response, Result};
use async_trait::async_trait;
use http::header::{AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION, SET_COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::Level;

/// What the [`LoggingInterceptor`] writes.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Level for request and response lines. Errors are always logged at
    /// `WARN` or above.
    pub level: Level,
    /// Include request headers.
    pub request_headers: bool,
    /// Include request bodies.
    pub request_body: bool,
    /// Include response headers.
    pub response_headers: bool,
    /// Include response bodies.
    pub response_body: bool,
    /// Bodies longer than this many characters are truncated.
    pub max_body_len: usize,
    /// Re-indent JSON bodies.
    pub pretty_json: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            request_headers: true,
            request_body: true,
            response_headers: false,
            response_body: true,
            max_body_len: 1024,
            pretty_json: false,
        }
    }
}

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {{
        let level: Level = $level;
        if level == Level::ERROR {
            tracing::error!($($arg)+)
        } else if level == Level::WARN {
            tracing::warn!($($arg)+)
        } else if level == Level::INFO {
            tracing::info!($($arg)+)
        } else if level == Level::DEBUG {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    }};
}

/// Logs requests, responses and errors through `tracing`.
///
/// Read-only: it never changes what passes through it, and a body it cannot
/// render is logged as a placeholder rather than failing the call.
#[derive(Debug, Clone, Default)]
pub struct LoggingInterceptor {
    options: LoggingOptions,
}

impl LoggingInterceptor {
    /// Creates a logging interceptor with the given options.
    pub fn new(options: LoggingOptions) -> Self {
        Self { options }
    }

    fn render_headers(&self, headers: &HeaderMap) -> String {
        headers
            .iter()
            .map(|(name, value)| {
                let value = if is_secret(name, value) {
                    "<redacted>"
                } else {
                    value.to_str().unwrap_or("<binary>")
                };
                format!("{}: {}", name, value)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn render_bytes(&self, bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes);
        let text = if self.options.pretty_json {
            serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| serde_json::to_string_pretty(&v).ok())
                .unwrap_or_else(|| text.into_owned())
        } else {
            text.into_owned()
        };
        truncate(&text, self.options.max_body_len)
    }

    fn render_body(&self, body: Option<&Body>) -> String {
        match body {
            None => String::new(),
            Some(Body::Multipart(multipart)) => format!(
                "<multipart: {} ({} bytes), {} fields>",
                multipart.file.file_name,
                multipart.file.data.len(),
                multipart.fields.len()
            ),
            Some(body) => self.render_bytes(&body.content_bytes()),
        }
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &str {
        "logging"
    }

    async fn on_request(&self, ctx: &CallContext, request: Request) -> Result<RequestAction> {
        let headers = if self.options.request_headers {
            self.render_headers(request.headers())
        } else {
            String::new()
        };
        let body = if self.options.request_body {
            self.render_body(request.body())
        } else {
            String::new()
        };

        log_at!(
            self.options.level,
            method = %request.method(),
            url = %request.url(),
            attempt = ctx.attempt(),
            cancel_key = %ctx.cancel_key(),
            headers = %headers,
            body = %body,
            "HTTP request"
        );
        Ok(RequestAction::Continue(request))
    }

    async fn on_response(
        &self,
        ctx: &CallContext,
        request: &Request,
        response: Response,
    ) -> Result<Response> {
        let headers = if self.options.response_headers {
            self.render_headers(&response.headers)
        } else {
            String::new()
        };
        let body = if self.options.response_body {
            self.render_bytes(&response.body)
        } else {
            String::new()
        };

        log_at!(
            self.options.level,
            method = %request.method(),
            url = %request.url(),
            status = response.status.as_u16(),
            attempts = response.attempts,
            from_cache = response.from_cache,
            cancel_key = %ctx.cancel_key(),
            headers = %headers,
            body = %body,
            "HTTP response"
        );
        Ok(response)
    }

    async fn on_error(&self, ctx: &CallContext, request: &Request, error: &Error, attempt: usize) -> bool {
        let body = match error.response() {
            Some(response) if self.options.response_body => self.render_bytes(&response.body),
            _ => String::new(),
        };
        let level = if error.is_cancelled() || error.is_bad_response() {
            Level::WARN
        } else {
            Level::ERROR
        };

        log_at!(
            level,
            method = %request.method(),
            url = %request.url(),
            kind = %error.kind(),
            status = ?error.status().map(|s| s.as_u16()),
            attempt = attempt,
            cancel_key = %ctx.cancel_key(),
            body = %body,
            "HTTP error: {}",
            error.message()
        );
        false
    }
}

/// Credentials by name, plus any value marked sensitive by whoever set it.
fn is_secret(name: &HeaderName, value: &HeaderValue) -> bool {
    value.is_sensitive() || [AUTHORIZATION, PROXY_AUTHORIZATION, COOKIE, SET_COOKIE].contains(name)
}
