//! Credential injection as an interceptor.

use super::{CallContext, Interceptor, RequestAction};
use crate::{Error, Request, Result};
use async_trait::async_trait;
use base64::Engine;
use http::{HeaderName, HeaderValue};
use std::sync::Arc;

/// A credential to attach to a request.
#[derive(Clone)]
pub enum Credential {
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// An API key sent in the named header.
    ApiKey {
        /// Header carrying the key, e.g. `x-api-key`.
        header: String,
        /// The key.
        key: String,
    },
    /// `Authorization: Basic <base64(username:password)>`.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Credential::ApiKey { header, .. } => write!(f, "ApiKey({}: <redacted>)", header),
            Credential::Basic { username, .. } => write!(f, "Basic({}:<redacted>)", username),
        }
    }
}

impl Credential {
    fn header(&self) -> Result<(HeaderName, HeaderValue)> {
        let (name, value) = match self {
            Credential::Bearer(token) => (
                http::header::AUTHORIZATION,
                format!("Bearer {}", token),
            ),
            Credential::ApiKey { header, key } => (
                HeaderName::try_from(header.as_str())
                    .map_err(|e| Error::unknown(format!("invalid API key header name: {}", e)))?,
                key.clone(),
            ),
            Credential::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                (http::header::AUTHORIZATION, format!("Basic {}", encoded))
            }
        };

        let mut value = HeaderValue::try_from(value)
            .map_err(|e| Error::unknown(format!("invalid credential value: {}", e)))?;
        value.set_sensitive(true);
        Ok((name, value))
    }
}

/// Supplies the credential for each attempt.
///
/// Called before every dispatch, so a provider that refreshes expired tokens
/// takes effect between retries. `Ok(None)` sends the request unauthenticated;
/// an error ends the call.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns the credential to use now.
    async fn credential(&self) -> Result<Option<Credential>>;
}

#[async_trait]
impl<F> CredentialProvider for F
where
    F: Fn() -> Option<Credential> + Send + Sync,
{
    async fn credential(&self) -> Result<Option<Credential>> {
        Ok(self())
    }
}

/// Injects a credential header computed fresh on every attempt.
///
/// # Examples
///
/// ```
/// use callguard::interceptors::{AuthInterceptor, Credential};
/// use std::sync::Arc;
///
/// let auth = AuthInterceptor::new(Arc::new(|| Some(Credential::Bearer("token".to_string()))));
/// ```
#[derive(Clone)]
pub struct AuthInterceptor {
    provider: Arc<dyn CredentialProvider>,
}

impl AuthInterceptor {
    /// Creates an interceptor using `provider`.
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self { provider }
    }

    /// A fixed bearer token.
    pub fn bearer(token: impl Into<String>) -> Self {
        let token = token.into();
        Self::new(Arc::new(move || Some(Credential::Bearer(token.clone()))))
    }

    /// A fixed API key in `header`.
    pub fn api_key(header: impl Into<String>, key: impl Into<String>) -> Self {
        let (header, key) = (header.into(), key.into());
        Self::new(Arc::new(move || {
            Some(Credential::ApiKey {
                header: header.clone(),
                key: key.clone(),
            })
        }))
    }

    /// Fixed basic-auth credentials.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        let (username, password) = (username.into(), password.into());
        Self::new(Arc::new(move || {
            Some(Credential::Basic {
                username: username.clone(),
                password: password.clone(),
            })
        }))
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    fn name(&self) -> &str {
        "auth"
    }

    async fn on_request(&self, ctx: &CallContext, request: Request) -> Result<RequestAction> {
        let Some(credential) = self.provider.credential().await? else {
            tracing::debug!(cancel_key = %ctx.cancel_key(), "No credential available");
            return Ok(RequestAction::Continue(request));
        };

        let (name, value) = credential.header()?;
        Ok(RequestAction::Continue(request.with_header_value(name, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn apply(interceptor: &AuthInterceptor) -> Request {
        let request = Request::new(Method::GET, "https://api.example.com");
        match interceptor
            .on_request(&CallContext::new("k"), request)
            .await
            .unwrap()
        {
            RequestAction::Continue(r) => r,
            _ => panic!("auth must continue"),
        }
    }

    #[tokio::test]
    async fn test_bearer() {
        let request = apply(&AuthInterceptor::bearer("abc")).await;
        assert_eq!(request.header("authorization"), Some("Bearer abc"));
    }

    #[tokio::test]
    async fn test_api_key() {
        let request = apply(&AuthInterceptor::api_key("X-Api-Key", "k1")).await;
        assert_eq!(request.header("x-api-key"), Some("k1"));
    }

    #[tokio::test]
    async fn test_basic() {
        let request = apply(&AuthInterceptor::basic("aladdin", "opensesame")).await;
        assert_eq!(
            request.header("authorization"),
            Some("Basic YWxhZGRpbjpvcGVuc2VzYW1l")
        );
    }

    #[tokio::test]
    async fn test_provider_evaluated_every_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let interceptor = AuthInterceptor::new(Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Some(Credential::Bearer(format!("token-{}", n)))
        }));

        assert_eq!(apply(&interceptor).await.header("authorization"), Some("Bearer token-1"));
        assert_eq!(apply(&interceptor).await.header("authorization"), Some("Bearer token-2"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_credential_leaves_request_alone() {
        let request = apply(&AuthInterceptor::new(Arc::new(|| None::<Credential>))).await;
        assert!(request.header("authorization").is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", Credential::Bearer("secret".into()));
        assert!(!rendered.contains("secret"));
    }
}
