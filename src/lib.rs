//! # Callguard - resilient HTTP request execution
//!
//! Callguard wraps an HTTP transport with the machinery every API client ends
//! up needing: an interceptor chain, retries with backoff, a bounded response
//! cache, and cancellation of in-flight calls by key. Every call returns a
//! single [`Result`]: a [`Response`] or a classified [`Error`], never a panic.
//!
//! ## Quick Start
//!
//! ```no_run
//! use callguard::{Body, CallOptions, Client};
//! use serde::Deserialize;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com")?
//!         .receive_timeout(Duration::from_secs(30))
//!         .max_retries(3)
//!         .retry_delay(Duration::from_millis(200))
//!         .enable_logging()
//!         .build()?;
//!
//!     // GET with callbacks; they have run by the time the call returns.
//!     let user = client
//!         .get(
//!             "/users/123",
//!             CallOptions::new().on_error(|e| eprintln!("lookup failed: {}", e)),
//!         )
//!         .await?;
//!     let user: User = user.json()?;
//!     println!("User: {}", user.name);
//!
//!     // POST a JSON body.
//!     let created = client
//!         .post("/users", Body::json(&json!({ "name": "Alice" }))?, CallOptions::new())
//!         .await?;
//!     println!("Created after {} attempt(s) in {:?}", created.attempts, created.latency);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Interceptors** - request, response and error hooks, with built-in logging, auth and cache
//! - **Retries** - fixed or exponential backoff, jitter, `Retry-After`, interceptor-forced retries
//! - **Response cache** - LRU with per-entry freshness from `Cache-Control` and `Expires`
//! - **Cancellation** - cancel calls by key, or all at once, during backoff or in flight
//! - **Streaming transfers** - downloads to disk and multipart uploads with progress callbacks
//! - **Rich errors** - a kind per failure class, with the request and the error response attached
//!
//! ## Error Handling
//!
//! ```no_run
//! use callguard::{CallOptions, Client, ErrorKind};
//!
//! # async fn example(client: Client) {
//! match client.get("/endpoint", CallOptions::new()).await {
//!     Ok(response) => println!("{}: {}", response.status, response.text()),
//!     Err(e) if e.kind() == ErrorKind::BadResponse => {
//!         let body = e.response().map(|r| r.text()).unwrap_or_default();
//!         eprintln!("HTTP {:?}: {}", e.status(), body);
//!     }
//!     Err(e) if e.is_timeout() => eprintln!("timed out after {} attempt(s)", e.attempts()),
//!     Err(e) => eprintln!("failed: {}", e),
//! }
//! # }
//! ```
//!
//! ## Cancellation
//!
//! ```no_run
//! use callguard::{CallOptions, Client};
//!
//! # async fn example(client: Client) {
//! let background = client.clone();
//! let search = tokio::spawn(async move {
//!     background
//!         .get("/search?q=rust", CallOptions::new().cancel_key("search"))
//!         .await
//! });
//!
//! client.cancel("search");
//! if let Ok(Err(e)) = search.await {
//!     assert!(e.is_cancelled());
//! }
//! # }
//! ```

pub mod cache;
mod cancel;
mod client;
pub mod config;
mod error;
pub mod freshness;
pub mod interceptors;
pub mod progress;
mod request;
mod response;
pub mod retry;
pub mod transport;

pub use cache::{CacheConfig, ResponseCache};
pub use cancel::{CancellationHandle, CancellationRegistry};
pub use client::{CallOptions, Client, ClientBuilder, UploadOptions};
pub use config::{ClientType, Config, ConfigError};
pub use error::{Error, ErrorKind, Result};
pub use request::{Body, FilePart, Multipart, Request};
pub use response::Response;
pub use retry::RetryConfig;
