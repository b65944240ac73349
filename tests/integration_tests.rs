//! Integration tests using wiremock to simulate HTTP servers.

use callguard::cache::CacheConfig;
use callguard::interceptors::AuthInterceptor;
use callguard::{Body, CallOptions, Client, ClientBuilder, ErrorKind, UploadOptions};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct TestData {
    id: u32,
    name: String,
}

fn test_data() -> TestData {
    TestData {
        id: 1,
        name: "Test".to_string(),
    }
}

/// Logs go to the test output; set `RUST_LOG=callguard=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn builder() -> ClientBuilder {
    init_tracing();
    Client::builder()
}

fn client_for(server: &MockServer) -> Client {
    builder()
        .base_url(server.uri())
        .unwrap()
        .retry_delay(Duration::from_millis(10))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_successful_get_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let response = client.get("/test", CallOptions::new()).await.unwrap();

    assert_eq!(response.json::<TestData>().unwrap(), test_data());
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 1);
    assert!(!response.was_retried());
    assert!(!response.from_cache);
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_successful_post_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/test"))
        .and(header("content-type", "application/json"))
        .and(body_string_contains("\"name\":\"New\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(test_data()))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let body = Body::json(&TestData {
        id: 0,
        name: "New".to_string(),
    })
    .unwrap();
    let response = client.post("/test", body, CallOptions::new()).await.unwrap();

    assert_eq!(response.status.as_u16(), 201);
}

#[tokio::test]
async fn test_all_verbs() {
    let mock_server = MockServer::start().await;

    for verb in ["GET", "HEAD", "DELETE", "PUT", "PATCH"] {
        Mock::given(method(verb))
            .and(path("/resource"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let client = client_for(&mock_server);
    let none = CallOptions::new;
    assert_eq!(client.get("/resource", none()).await.unwrap().status.as_u16(), 204);
    assert_eq!(client.head("/resource", none()).await.unwrap().status.as_u16(), 204);
    assert_eq!(client.delete("/resource", none()).await.unwrap().status.as_u16(), 204);
    assert_eq!(client.put("/resource", "x", none()).await.unwrap().status.as_u16(), 204);
    assert_eq!(client.patch("/resource", "x", none()).await.unwrap().status.as_u16(), 204);
}

#[tokio::test]
async fn test_http_error_4xx() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not found"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let err = client.get("/test", CallOptions::new()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BadResponse);
    assert_eq!(err.status().map(|s| s.as_u16()), Some(404));
    assert_eq!(err.response().unwrap().text(), "Not found");
    assert_eq!(err.attempts(), 1);
    assert!(err.request().unwrap().url().ends_with("/test"));
}

#[tokio::test]
async fn test_retry_on_server_error() {
    let mock_server = MockServer::start().await;

    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    // First two requests fail, third succeeds
    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                ResponseTemplate::new(503).set_body_string("Server error")
            } else {
                ResponseTemplate::new(200).set_body_json(test_data())
            }
        })
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let response = client.get("/test", CallOptions::new()).await.unwrap();

    assert_eq!(response.attempts, 3);
    assert!(response.was_retried());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_max_retries_exceeded() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Server error"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = builder()
        .base_url(mock_server.uri())
        .unwrap()
        .max_retries(2)
        .retry_delay(Duration::from_millis(10))
        .build()
        .unwrap();

    let err = client.get("/test", CallOptions::new()).await.unwrap_err();

    // max_retries: 2 means 3 total attempts, and the last error is returned.
    assert_eq!(err.attempts(), 3);
    assert_eq!(err.status().map(|s| s.as_u16()), Some(500));
}

#[tokio::test]
async fn test_non_retryable_status_fails_immediately() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&mock_server)
        .await;

    let err = client_for(&mock_server)
        .get("/test", CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.attempts(), 1);
}

#[tokio::test]
async fn test_retry_after_header_is_honored() {
    let mock_server = MockServer::start().await;

    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "1")
                    .set_body_string("Rate limited")
            } else {
                ResponseTemplate::new(200).set_body_json(test_data())
            }
        })
        .mount(&mock_server)
        .await;

    let client = builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry(callguard::RetryConfig {
            retry_delay: Duration::from_millis(10),
            respect_retry_after: true,
            ..callguard::RetryConfig::default()
        })
        .build()
        .unwrap();

    let start = std::time::Instant::now();
    let response = client.get("/test", CallOptions::new()).await.unwrap();

    assert_eq!(response.attempts, 2);
    // Should have waited approximately 1 second as the server asked
    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_default_and_call_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .and(header("user-agent", "test-agent"))
        .and(header("x-env", "prod"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = builder()
        .base_url(mock_server.uri())
        .unwrap()
        .default_header("User-Agent", "test-agent")
        .unwrap()
        .default_header("X-Env", "dev")
        .unwrap()
        .build()
        .unwrap();

    let response = client
        .get("/test", CallOptions::new().header("x-env", "prod"))
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 200);
}

#[tokio::test]
async fn test_query_parameters() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "rust lang"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = client_for(&mock_server)
        .get(
            "/search",
            CallOptions::new().query("q", "rust lang").query("page", "2"),
        )
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 200);
}

#[tokio::test]
async fn test_response_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(test_data())
                .insert_header("x-custom-header", "custom-value"),
        )
        .mount(&mock_server)
        .await;

    let response = client_for(&mock_server)
        .get("/test", CallOptions::new())
        .await
        .unwrap();

    assert_eq!(response.header("x-custom-header"), Some("custom-value"));
    assert!(response.latency > Duration::ZERO);
}

#[tokio::test]
async fn test_auth_interceptor_sets_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = builder()
        .base_url(mock_server.uri())
        .unwrap()
        .interceptor(AuthInterceptor::bearer("secret-token"))
        .enable_logging()
        .build()
        .unwrap();

    assert!(client.get("/private", CallOptions::new()).await.is_ok());
}

#[tokio::test]
async fn test_callbacks_run_before_return() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let (on_error, on_status) = (seen.clone(), seen.clone());
    let options = CallOptions::new()
        .on_success(|_| panic!("must not be called"))
        .on_error(move |e| on_error.lock().unwrap().push(format!("error {}", e.kind())))
        .on_status(404, move |status, result| {
            assert!(result.is_err());
            on_status.lock().unwrap().push(format!("status {}", status.as_u16()));
        });

    let result = client_for(&mock_server).get("/missing", options).await;

    assert!(result.is_err());
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["error bad response".to_string(), "status 404".to_string()]
    );
}

#[tokio::test]
async fn test_connection_error() {
    // Nothing listens on this port once the server is dropped.
    let uri = {
        let server = MockServer::start().await;
        server.uri()
    };

    let client = builder()
        .base_url(uri)
        .unwrap()
        .max_retries(1)
        .retry_delay(Duration::from_millis(10))
        .build()
        .unwrap();

    let err = client.get("/test", CallOptions::new()).await.unwrap_err();
    assert!(err.is_connection_error(), "unexpected error: {}", err);
    assert_eq!(err.attempts(), 2);
}

#[tokio::test]
async fn test_receive_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&mock_server)
        .await;

    let client = builder()
        .base_url(mock_server.uri())
        .unwrap()
        .max_retries(0)
        .build()
        .unwrap();

    let err = client
        .get("/slow", CallOptions::new().timeout(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReceiveTimeout);
}

#[tokio::test]
async fn test_cancel_in_flight_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let background = client.clone();
    let call = tokio::spawn(async move {
        background
            .get("/slow", CallOptions::new().cancel_key("slow"))
            .await
    });

    while client.in_flight() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    client.cancel("slow");

    let err = call.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_cache_serves_repeated_get() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cached"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = builder()
        .base_url(mock_server.uri())
        .unwrap()
        .cache(CacheConfig::default())
        .build()
        .unwrap();

    let first = client.get("/cached", CallOptions::new()).await.unwrap();
    let second = client
        .get("/cached", CallOptions::new().header("x-request-id", "another"))
        .await
        .unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(second.json::<TestData>().unwrap(), test_data());
    assert_eq!(client.cache().unwrap().stats().hits, 1);
}

#[tokio::test]
async fn test_download_to_file() {
    let mock_server = MockServer::start().await;
    let payload = vec![42u8; 200 * 1024];

    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("file.bin");
    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();

    let response = client_for(&mock_server)
        .download(
            "/file.bin",
            &target,
            CallOptions::new().on_progress(move |done, total| sink.lock().unwrap().push((done, total))),
        )
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(std::fs::read(&target).unwrap(), payload);
    let total = payload.len() as u64;
    assert_eq!(progress.lock().unwrap().last(), Some(&(total, Some(total))));
}

#[tokio::test]
async fn test_download_retry_truncates_partial_file() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/report.csv"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/report.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string("a,b\n1,2\n"))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("report.csv");
    std::fs::write(&target, "stale contents that are longer than the new ones").unwrap();

    let response = client_for(&mock_server)
        .download("/report.csv", &target, CallOptions::new())
        .await
        .unwrap();

    assert_eq!(response.attempts, 2);
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "a,b\n1,2\n");
}

#[tokio::test]
async fn test_download_error_keeps_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410).set_body_string("expired link"))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("gone");
    let err = client_for(&mock_server)
        .download("/gone", &target, CallOptions::new())
        .await
        .unwrap_err();

    assert!(err.is_bad_response());
    assert_eq!(err.response().unwrap().text(), "expired link");
    assert!(!target.exists());
}

#[tokio::test]
async fn test_upload_file() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("name=\"document\"; filename=\"notes.txt\""))
        .and(body_string_contains("hello upload"))
        .and(body_string_contains("name=\"owner\""))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("notes.txt");
    std::fs::write(&source, "hello upload").unwrap();

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    let upload = UploadOptions {
        field_name: "document".to_string(),
        content_type: Some("text/plain".to_string()),
        fields: vec![("owner".to_string(), "alice".to_string())],
        ..UploadOptions::default()
    };

    let response = client_for(&mock_server)
        .upload_file(
            "/upload",
            &source,
            upload,
            CallOptions::new().on_progress(move |done, total| sink.lock().unwrap().push((done, total))),
        )
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 201);
    assert_eq!(progress.lock().unwrap().last(), Some(&(12, Some(12))));
}

#[tokio::test]
async fn test_upload_missing_file_reports_error() {
    let mock_server = MockServer::start().await;
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = errors.clone();

    let err = client_for(&mock_server)
        .upload_file(
            "/upload",
            "/definitely/not/here.txt",
            UploadOptions::default(),
            CallOptions::new().on_error(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}
