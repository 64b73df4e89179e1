//! Test utilities: an in-memory transport with scripted replies.
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobtrail::testing::{RecordingTransport, Reply};
//!
//! #[tokio::test]
//! async fn test_reports_sync() {
//!     let transport = RecordingTransport::new().then(Reply::status(503));
//!     let client = jobtrail::Client::builder()
//!         .api_key("test")
//!         .transport(transport.handle())
//!         .build()
//!         .unwrap();
//!     // ... run code that completes jobs
//!     transport.assert_requests(2);
//! }
//! ```

use crate::events::Event;
use crate::transport::{BoxFuture, DynTransport, Response, Transport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the fake endpoint does with one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Respond with a status and body.
    Status(u16, String),
    /// Fail before any response, like a refused connection.
    Error(String),
    /// Never respond.
    Hang,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Reply::Status(status, String::new())
    }

    pub fn status_with_body(status: u16, body: impl Into<String>) -> Self {
        Reply::Status(status, body.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error(message.into())
    }
}

/// In-memory [`Transport`] that records every request body.
///
/// Replies are taken from a script in order; once it runs out every request
/// gets the fallback reply (200 unless changed with [`always`](Self::always)).
/// Clones share the same recording.
#[derive(Debug, Clone)]
pub struct RecordingTransport {
    inner: Arc<Mutex<RecordingInner>>,
}

#[derive(Debug)]
struct RecordingInner {
    requests: Vec<serde_json::Value>,
    script: VecDeque<Reply>,
    fallback: Reply,
    latency: Option<Duration>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    /// Create a transport that accepts everything with 200.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecordingInner {
                requests: Vec::new(),
                script: VecDeque::new(),
                fallback: Reply::status(200),
                latency: None,
            })),
        }
    }

    /// Queue a reply for the next unscripted request.
    pub fn then(self, reply: Reply) -> Self {
        self.inner.lock().unwrap().script.push_back(reply);
        self
    }

    /// Set the reply used once the script is exhausted.
    pub fn always(self, reply: Reply) -> Self {
        self.inner.lock().unwrap().fallback = reply;
        self
    }

    /// Wait this long before replying to each request.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.inner.lock().unwrap().latency = Some(latency);
        self
    }

    /// A type-erased handle for [`ClientBuilder::transport`](crate::ClientBuilder::transport).
    pub fn handle(&self) -> DynTransport {
        Arc::new(self.clone())
    }

    /// Every request body received so far.
    pub fn requests(&self) -> Vec<serde_json::Value> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.inner.lock().unwrap().requests.len()
    }

    /// Events from every request body, in arrival order. Retried requests
    /// contribute their events once per attempt.
    pub fn received_events(&self) -> Vec<Event> {
        self.requests()
            .into_iter()
            .flat_map(|body| events_of(&body))
            .collect()
    }

    /// Events carried by the `index`-th request.
    pub fn events_in_request(&self, index: usize) -> Vec<Event> {
        self.requests()
            .get(index)
            .map(events_of)
            .unwrap_or_default()
    }

    /// Assert exactly `expected` requests were made.
    pub fn assert_requests(&self, expected: usize) {
        let actual = self.request_count();
        assert_eq!(
            actual, expected,
            "Expected {} request(s) to the ingestion endpoint, found {}",
            expected, actual
        );
    }

    fn next_reply(&self, body: serde_json::Value) -> (Reply, Option<Duration>) {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(body);
        let reply = inner
            .script
            .pop_front()
            .unwrap_or_else(|| inner.fallback.clone());
        (reply, inner.latency)
    }
}

impl Transport for RecordingTransport {
    fn post(&self, body: serde_json::Value) -> BoxFuture<'_, crate::Result<Response>> {
        let (reply, latency) = self.next_reply(body);
        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            match reply {
                Reply::Status(status, body) => Ok(Response::new(status, body)),
                Reply::Error(message) => Err(crate::Error::Transport(message)),
                Reply::Hang => std::future::pending().await,
            }
        })
    }
}

fn events_of(body: &serde_json::Value) -> Vec<Event> {
    body.get("events")
        .cloned()
        .and_then(|events| serde_json::from_value(events).ok())
        .unwrap_or_default()
}
