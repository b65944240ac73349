//! Client configuration.
//!
//! [`Config`] is a plain record: clone it, tweak it, hand it to
//! [`Client::from_config`](crate::Client::from_config) or start from
//! [`Client::builder`](crate::Client::builder). Nothing in it is global, so any
//! number of independently configured clients can coexist.

use crate::cache::CacheConfig;
use crate::interceptors::{Interceptor, LoggingOptions};
use crate::retry::RetryConfig;
use http::{HeaderMap, StatusCode};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Which flavour of the built-in transport to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    /// Pooled client negotiating HTTP/1.1 or HTTP/2.
    #[default]
    Default,
    /// Pooled client restricted to HTTP/1.1.
    Http1,
}

/// How a status code is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The response is returned to the caller.
    Success,
    /// The response becomes an [`ErrorKind::BadResponse`](crate::ErrorKind::BadResponse).
    Error,
}

/// Errors raised while building a client.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The base URL could not be parsed.
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    /// A default header name or value is invalid.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// The same status codes appear in both the success and error sets.
    #[error("Status codes configured as both success and error: {0:?}")]
    OverlappingStatusCodes(Vec<u16>),

    /// The transport could not be constructed.
    #[error("Failed to build transport: {0}")]
    Transport(String),
}

/// Everything a [`Client`](crate::Client) needs to know.
#[derive(Clone)]
pub struct Config {
    /// Prefix applied to relative request URLs.
    pub base_url: Option<Url>,
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Time allowed to receive a response, unless a request overrides it.
    pub receive_timeout: Duration,
    /// Headers added to every request. Per-call headers of the same name win.
    pub default_headers: HeaderMap,
    /// Status codes returned to the caller as responses.
    pub success_codes: BTreeSet<u16>,
    /// Status codes turned into [`ErrorKind::BadResponse`](crate::ErrorKind::BadResponse).
    pub error_codes: BTreeSet<u16>,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Interceptors, in chain order.
    pub interceptors: Vec<Arc<dyn Interceptor>>,
    /// When set, a [`LoggingInterceptor`](crate::interceptors::LoggingInterceptor)
    /// with these options is appended to the chain.
    pub logging: Option<LoggingOptions>,
    /// When set, a [`CacheInterceptor`](crate::interceptors::CacheInterceptor)
    /// over a fresh cache with this configuration is appended to the chain.
    pub cache: Option<CacheConfig>,
    /// Built-in transport flavour.
    pub client_type: ClientType,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_timeout: Duration::from_secs(30),
            receive_timeout: Duration::from_secs(30),
            default_headers: HeaderMap::new(),
            success_codes: (200..=299).collect(),
            error_codes: (400..=599).collect(),
            retry: RetryConfig::default(),
            interceptors: Vec::new(),
            logging: None,
            cache: None,
            client_type: ClientType::Default,
        }
    }
}

impl Config {
    /// Classifies a status code.
    ///
    /// Error membership is checked first, so a code present in both sets is
    /// an error. A code in neither set is a success.
    pub fn classify(&self, status: StatusCode) -> Classification {
        let code = status.as_u16();
        if self.error_codes.contains(&code) {
            Classification::Error
        } else {
            Classification::Success
        }
    }

    /// Checks the configuration for contradictions.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OverlappingStatusCodes`] if a status code is both
    /// a success and an error code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let overlap: Vec<u16> = self
            .success_codes
            .intersection(&self.error_codes)
            .copied()
            .collect();
        if overlap.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::OverlappingStatusCodes(overlap))
        }
    }

    /// Resolves `url` against the base URL.
    ///
    /// Absolute `http`/`https` URLs are used as-is. Anything else is appended to
    /// the base URL with exactly one `/` between the two.
    pub fn resolve_url(&self, url: &str) -> crate::Result<Url> {
        let parse = |s: &str| {
            Url::parse(s).map_err(|e| crate::Error::unknown(format!("invalid URL {:?}: {}", s, e)))
        };

        if url.starts_with("http://") || url.starts_with("https://") {
            return parse(url);
        }

        match &self.base_url {
            Some(base) => {
                let base = base.as_str().trim_end_matches('/');
                let path = url.trim_start_matches('/');
                if path.is_empty() {
                    parse(base)
                } else {
                    parse(&format!("{}/{}", base, path))
                }
            }
            None => parse(url),
        }
    }
}
