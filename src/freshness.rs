//! Header parsing for response freshness and server-requested retry delays.
//!
//! The cache asks [`freshness`] how long a response may be reused, and the
//! retry engine asks [`retry_after`] whether the server named its own delay.

use http::HeaderMap;
use std::time::{Duration, SystemTime};

/// How long a response may be served from cache, as declared by its headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The response must not be stored (`Cache-Control: no-store`). Also
    /// reported for `no-cache`, since stored responses are never revalidated.
    NoStore,
    /// The response declares its own freshness window.
    MaxAge(Duration),
    /// The response says nothing; the cache's default applies.
    Unspecified,
}

/// Reads `Cache-Control` and `Expires` from response headers.
///
/// `s-maxage` wins over `max-age`, which wins over `Expires`. An `Expires`
/// date in the past yields a zero window.
///
/// # Examples
///
/// ```
/// use callguard::freshness::{freshness, Freshness};
/// use http::HeaderMap;
/// use std::time::Duration;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("cache-control", "public, max-age=60".parse().unwrap());
///
/// assert_eq!(freshness(&headers), Freshness::MaxAge(Duration::from_secs(60)));
/// ```
pub fn freshness(headers: &HeaderMap) -> Freshness {
    let mut max_age = None;
    let mut shared_max_age = None;

    for value in headers.get_all("cache-control") {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for directive in value.split(',') {
            let directive = directive.trim().to_ascii_lowercase();
            if directive == "no-store" || directive == "no-cache" || directive.starts_with("no-cache=") {
                return Freshness::NoStore;
            }
            if let Some(seconds) = directive.strip_prefix("s-maxage=") {
                shared_max_age = parse_seconds(seconds);
            } else if let Some(seconds) = directive.strip_prefix("max-age=") {
                max_age = parse_seconds(seconds);
            }
        }
    }

    if let Some(age) = shared_max_age.or(max_age) {
        return Freshness::MaxAge(age);
    }

    if let Some(expires) = headers.get("expires").and_then(|v| v.to_str().ok()) {
        return match httpdate::parse_http_date(expires) {
            Ok(at) => Freshness::MaxAge(
                at.duration_since(SystemTime::now())
                    .unwrap_or(Duration::ZERO),
            ),
            // An unparseable Expires means "already expired".
            Err(_) => Freshness::MaxAge(Duration::ZERO),
        };
    }

    Freshness::Unspecified
}

/// Parses the `Retry-After` header.
///
/// Supports both delay-seconds and HTTP-date forms. Dates in the past yield
/// `None`.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = headers.get("retry-after")?.to_str().ok()?.trim();

    if let Ok(seconds) = header.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = httpdate::parse_http_date(header).ok()?;
    at.duration_since(SystemTime::now()).ok()
}

fn parse_seconds(value: &str) -> Option<Duration> {
    value.trim_matches('"').parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_no_store_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("cache-control", HeaderValue::from_static("max-age=60, no-store"));
        assert_eq!(freshness(&headers), Freshness::NoStore);
    }

    #[test]
    fn test_no_cache_is_not_stored() {
        let mut headers = HeaderMap::new();
        headers.insert("cache-control", HeaderValue::from_static("public, no-cache, max-age=60"));
        assert_eq!(freshness(&headers), Freshness::NoStore);

        let mut headers = HeaderMap::new();
        headers.insert("cache-control", HeaderValue::from_static("no-cache=\"set-cookie\""));
        assert_eq!(freshness(&headers), Freshness::NoStore);
    }

    #[test]
    fn test_s_maxage_preferred() {
        let mut headers = HeaderMap::new();
        headers.insert("cache-control", HeaderValue::from_static("max-age=60, s-maxage=10"));
        assert_eq!(freshness(&headers), Freshness::MaxAge(Duration::from_secs(10)));
    }

    #[test]
    fn test_expires_in_past() {
        let mut headers = HeaderMap::new();
        headers.insert("expires", HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"));
        assert_eq!(freshness(&headers), Freshness::MaxAge(Duration::ZERO));
    }

    #[test]
    fn test_expires_in_future() {
        let mut headers = HeaderMap::new();
        let at = SystemTime::now() + Duration::from_secs(120);
        headers.insert(
            "expires",
            HeaderValue::from_str(&httpdate::fmt_http_date(at)).unwrap(),
        );

        match freshness(&headers) {
            Freshness::MaxAge(age) => {
                assert!(age >= Duration::from_secs(118) && age <= Duration::from_secs(120))
            }
            other => panic!("expected MaxAge, got {:?}", other),
        }
    }

    #[test]
    fn test_unspecified() {
        assert_eq!(freshness(&HeaderMap::new()), Freshness::Unspecified);
    }

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("60"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_retry_after_past_date() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }
}
