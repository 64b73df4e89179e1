use jobtrail::{Client, DeliveryError, DeliveryErrorKind, DeliveryMode, JobOptions, RetryConfig};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EVENTS_PATH: &str = "/v1/events";

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::new()
        .with_max_retries(max_retries)
        .with_base_backoff(Duration::from_millis(1))
        .with_max_backoff(Duration::from_millis(5))
}

type Failures = Arc<Mutex<Vec<(DeliveryError, usize)>>>;

fn client_for(server: &MockServer, max_retries: u32) -> (Client, Failures) {
    let failures: Failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    let client = Client::builder()
        .api_key("test-key")
        .base_url(server.uri())
        .retry(fast_retry(max_retries))
        .on_error(move |err, events| sink.lock().unwrap().push((err.clone(), events.len())))
        .build()
        .unwrap();
    (client, failures)
}

async fn request_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.body_json::<Value>().unwrap())
        .collect()
}

// ---------------------------------------------------------------------------
// Request shape
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_per_job_posts_events_with_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .and(header("Authorization", "Bearer test-key"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let (client, failures) = client_for(&server, 3);
    let job = client.create_job(
        JobOptions::new("invoice.sync")
            .external_id("ext-1")
            .meta("region", "eu"),
    );
    job.log_event("halfway");
    job.done(Some(json!({"synced": 3}))).await;

    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 1);
    let events = bodies[0]["events"].as_array().unwrap();
    assert_eq!(events.len(), 3);

    assert_eq!(events[0]["type"], "job.started");
    assert_eq!(events[0]["jobId"], job.id());
    assert_eq!(events[0]["externalId"], "ext-1");
    assert_eq!(events[0]["data"]["jobType"], "invoice.sync");
    assert_eq!(events[0]["data"]["metadata"], json!({"region": "eu"}));

    assert_eq!(events[1]["type"], "job.event");
    assert!(events[1].get("externalId").is_none());
    assert_eq!(events[1]["data"]["message"], "halfway");

    assert_eq!(events[2]["type"], "job.done");
    assert_eq!(events[2]["data"]["result"], json!({"synced": 3}));
    assert!(events[2]["data"]["durationMs"].is_i64());

    assert!(failures.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_custom_headers_are_sent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .and(header("X-Tenant-Id", "tenant-42"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::builder()
        .api_key("test-key")
        .base_url(format!("{}/", server.uri()))
        .header("X-Tenant-Id", "tenant-42")
        .build()
        .unwrap();

    client.create_job("t").skip("nothing new").await;
}

// ---------------------------------------------------------------------------
// Status classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_207_is_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(
            ResponseTemplate::new(207)
                .set_body_json(json!({"results": [{"ok": true}, {"ok": false}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (client, failures) = client_for(&server, 3);
    client.create_job("t").done(None).await;

    assert!(failures.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_400_is_not_retried_and_surfaces_error_field() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "events[2].type is invalid"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (client, failures) = client_for(&server, 5);
    client.create_job("t").done(None).await;

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    let (err, count) = &failures[0];
    assert_eq!(err.kind, DeliveryErrorKind::Rejected);
    assert_eq!(err.status, Some(400));
    assert_eq!(err.message, "events[2].type is invalid");
    assert_eq!(err.attempts, 1);
    assert_eq!(*count, 2);
}

#[tokio::test]
async fn test_401_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "invalid api key"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, failures) = client_for(&server, 3);
    client.create_job("t").failed("boom").await;

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].0.is_rejected());
    assert_eq!(failures[0].0.status, Some(401));
    assert_eq!(failures[0].0.message, "invalid api key");
}

#[tokio::test]
async fn test_retryable_status_makes_max_retries_plus_one_attempts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let (client, failures) = client_for(&server, 2);
    client.create_job("t").done(None).await;

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    let (err, _) = &failures[0];
    assert_eq!(err.kind, DeliveryErrorKind::RetriesExhausted);
    assert_eq!(err.status, Some(503));
    assert_eq!(err.message, "overloaded");
    assert_eq!(err.attempts, 3);
}

#[tokio::test]
async fn test_429_then_success_recovers_without_observer() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (client, failures) = client_for(&server, 3);
    client.create_job("t").done(None).await;

    assert!(failures.lock().unwrap().is_empty());
    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 3);
    assert!(bodies.iter().all(|b| b == &bodies[0]));
}

#[tokio::test]
async fn test_slow_response_times_out_as_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .expect(2)
        .mount(&server)
        .await;

    let failures: Failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    let client = Client::builder()
        .api_key("test-key")
        .base_url(server.uri())
        .retry(fast_retry(1))
        .request_timeout(Duration::from_millis(50))
        .on_error(move |err, events| sink.lock().unwrap().push((err.clone(), events.len())))
        .build()
        .unwrap();

    client.create_job("t").done(None).await;

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].0.is_exhausted());
    assert_eq!(failures[0].0.status, None);
    assert!(failures[0].0.message.contains("timed out"));
}

// ---------------------------------------------------------------------------
// Disabled client
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_disabled_client_makes_no_requests() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    for mode in [DeliveryMode::PerJob, DeliveryMode::Batch] {
        let client = Client::builder()
            .api_key("test-key")
            .base_url(server.uri())
            .mode(mode)
            .batch_size(1)
            .disabled(true)
            .build()
            .unwrap();

        let job = client.create_job("t");
        job.log_event("x");
        job.done(None).await;
        client.flush().await;
        client.shutdown().await;
    }
}
