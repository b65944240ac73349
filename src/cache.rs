//! Bounded response cache keyed by request fingerprint.
//!
//! Entries live in an LRU map guarded by a mutex. Capacity is enforced on
//! insert by evicting the least recently used entry; expiry is checked lazily
//! when an entry is looked up.

use crate::{Request, Response};
use http::{HeaderName, Method};
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Which request headers take part in the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyHeaders {
    /// Every header except the listed ones (lowercase names).
    AllExcept(Vec<String>),
    /// Only the listed headers (lowercase names).
    Only(Vec<String>),
}

impl Default for KeyHeaders {
    fn default() -> Self {
        KeyHeaders::AllExcept(
            ["x-request-id", "x-correlation-id", "traceparent", "date"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
    }
}

impl KeyHeaders {
    fn includes(&self, name: &HeaderName) -> bool {
        match self {
            KeyHeaders::AllExcept(excluded) => !excluded.iter().any(|h| h == name.as_str()),
            KeyHeaders::Only(included) => included.iter().any(|h| h == name.as_str()),
        }
    }
}

/// Cache behavior.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of stored responses. Values below 1 are treated as 1.
    pub max_entries: usize,
    /// Freshness window for responses that do not declare their own.
    pub default_max_age: Duration,
    /// Methods whose responses are cached.
    pub cacheable_methods: Vec<Method>,
    /// Only store responses whose status is explicitly a success code.
    pub cache_only_success: bool,
    /// Headers that take part in the fingerprint.
    pub key_headers: KeyHeaders,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            default_max_age: Duration::from_secs(300),
            cacheable_methods: vec![Method::GET],
            cache_only_success: true,
            key_headers: KeyHeaders::default(),
        }
    }
}

/// Deterministic cache key for a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// The hex-encoded digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    fingerprint: Fingerprint,
    response: Response,
    created_at: Instant,
    max_age: Duration,
    weight: usize,
}

impl CacheEntry {
    /// The entry's key.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// The stored response.
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// How long the entry stays fresh.
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Approximate bytes held by the entry.
    pub fn weight(&self) -> usize {
        self.weight
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.max_age
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing fresh.
    pub misses: u64,
    /// Responses stored.
    pub insertions: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
    /// Entries dropped because they were stale.
    pub expirations: u64,
}

struct State {
    entries: LruCache<Fingerprint, CacheEntry>,
    stats: CacheStats,
    weight: usize,
}

/// Thread-safe LRU response cache.
///
/// # Examples
///
/// ```
/// use callguard::cache::{CacheConfig, ResponseCache};
/// use callguard::Request;
/// use http::Method;
///
/// let cache = ResponseCache::new(CacheConfig::default());
/// let request = Request::new(Method::GET, "https://api.example.com/users?b=2&a=1");
/// let same = Request::new(Method::GET, "https://API.example.com/users?a=1&b=2");
///
/// assert_eq!(cache.fingerprint(&request), cache.fingerprint(&same));
/// assert!(cache.get(&cache.fingerprint(&request)).is_none());
/// ```
pub struct ResponseCache {
    config: CacheConfig,
    state: Mutex<State>,
}

impl ResponseCache {
    /// Creates an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            state: Mutex::new(State {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
                weight: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether responses to `method` are cached.
    pub fn is_cacheable_method(&self, method: &Method) -> bool {
        self.config.cacheable_methods.contains(method)
    }

    /// Computes the fingerprint of `request`.
    ///
    /// Covers the method, the normalized URL (lowercased scheme and host,
    /// sorted query, no fragment), the configured header subset, and for
    /// methods other than GET and HEAD the body.
    pub fn fingerprint(&self, request: &Request) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(request.method().as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(normalize_url(request.url()).as_bytes());
        hasher.update(b"\n");

        let mut headers: Vec<(&str, &[u8])> = request
            .headers()
            .iter()
            .filter(|(name, _)| self.config.key_headers.includes(name))
            .map(|(name, value)| (name.as_str(), value.as_bytes()))
            .collect();
        headers.sort();
        for (name, value) in headers {
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value);
            hasher.update(b"\n");
        }

        if !matches!(*request.method(), Method::GET | Method::HEAD) {
            if let Some(body) = request.body() {
                hasher.update(b"\n");
                hasher.update(body.content_bytes());
            }
        }

        let digest = hasher.finalize();
        Fingerprint(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Returns a fresh entry's response, dropping the entry if it has expired.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Response> {
        let now = Instant::now();
        let mut guard = self.state();
        let state = &mut *guard;

        let expired = match state.entries.get(fingerprint) {
            Some(entry) if !entry.is_expired(now) => {
                let response = entry.response.clone();
                state.stats.hits += 1;
                return Some(response);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            if let Some(entry) = state.entries.pop(fingerprint) {
                state.weight = state.weight.saturating_sub(entry.weight);
            }
            state.stats.expirations += 1;
        }
        state.stats.misses += 1;
        None
    }

    /// Stores `response` under `fingerprint` for `max_age`, replacing any
    /// previous entry and evicting the least recently used one if full.
    pub fn insert(&self, fingerprint: Fingerprint, response: Response, max_age: Duration) {
        let weight = response.weight();
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            response,
            created_at: Instant::now(),
            max_age,
            weight,
        };

        let mut state = self.state();
        state.weight += weight;
        state.stats.insertions += 1;
        if let Some((old_key, old)) = state.entries.push(fingerprint.clone(), entry) {
            state.weight = state.weight.saturating_sub(old.weight);
            if old_key != fingerprint {
                state.stats.evictions += 1;
                tracing::debug!(fingerprint = %old_key, "Evicted cached response");
            }
        }
    }

    /// Removes the entry for `fingerprint`. Returns `true` if one existed.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        let mut state = self.state();
        match state.entries.pop(fingerprint) {
            Some(entry) => {
                state.weight = state.weight.saturating_sub(entry.weight);
                true
            }
            None => false,
        }
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.weight = 0;
    }

    /// Number of stored entries, including stale ones not yet looked up.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate bytes held by all entries.
    pub fn total_weight(&self) -> usize {
        self.state().weight
    }

    /// A snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        self.state().stats
    }
}

fn normalize_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            let mut pairs: Vec<(String, String)> = url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            if pairs.is_empty() {
                url.set_query(None);
            } else {
                pairs.sort();
                url.query_pairs_mut().clear().extend_pairs(pairs);
            }
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}
