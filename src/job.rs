use crate::events::{Event, EventData, EventKind};
use crate::transport::BoxFuture;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ---------------------------------------------------------------------------
// Delivery strategy
// ---------------------------------------------------------------------------

/// Where a job's events go once it reaches a terminal state.
///
/// Implementations must fully handle delivery failure themselves: `deliver`
/// has no error channel, so a job's terminal methods can never fail because
/// telemetry could not be shipped.
pub trait Deliver: Send + Sync + fmt::Debug {
    /// Take ownership of a completed job's full event sequence.
    fn deliver(&self, events: Vec<Event>) -> BoxFuture<'_, ()>;
}

// ---------------------------------------------------------------------------
// Job State
// ---------------------------------------------------------------------------

/// The lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepting progress events.
    Open,
    /// A terminal event has been recorded. Nothing further is accepted.
    Completed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Open => "open",
            JobState::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

// ---------------------------------------------------------------------------
// Job options
// ---------------------------------------------------------------------------

/// The business entity a job operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: String,
    /// Human-friendly reference, e.g. an invoice number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_ref: Option<String>,
}

impl Entity {
    /// Describe the business object a job acts on.
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            human_ref: None,
        }
    }

    /// Set a human-friendly reference shown alongside the id.
    pub fn human_ref(mut self, human_ref: impl Into<String>) -> Self {
        self.human_ref = Some(human_ref.into());
        self
    }
}

/// Options for [`Client::create_job`](crate::Client::create_job).
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub job_type: String,
    pub entity: Option<Entity>,
    /// Idempotency key forwarded on the `started` event.
    pub external_id: Option<String>,
    /// Free-form metadata for the `started` event. Omitted when empty.
    pub metadata: EventData,
}

impl JobOptions {
    /// Options for a job of the given type, with nothing else set.
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            ..Self::default()
        }
    }

    /// Attach the entity the job acts on.
    pub fn entity(mut self, entity: Entity) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Set the idempotency key.
    pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Replace the metadata map.
    pub fn metadata(mut self, metadata: EventData) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add a single metadata entry.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<&str> for JobOptions {
    fn from(job_type: &str) -> Self {
        JobOptions::new(job_type)
    }
}

impl From<String> for JobOptions {
    fn from(job_type: String) -> Self {
        JobOptions::new(job_type)
    }
}

// ---------------------------------------------------------------------------
// Event inputs
// ---------------------------------------------------------------------------

/// Input to [`Job::log_event`]: a message, structured data, or both.
///
/// Data keys are merged on top of the message, so a `message` key in `data`
/// wins over the message argument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub message: Option<String>,
    pub data: EventData,
}

impl Progress {
    /// An empty progress event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the human-readable message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Replace the structured data.
    pub fn data(mut self, data: EventData) -> Self {
        self.data = data;
        self
    }

    /// Add a single data entry.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    fn into_data(self) -> EventData {
        let mut payload = EventData::new();
        if let Some(message) = self.message {
            payload.insert("message".into(), Value::String(message));
        }
        payload.extend(self.data);
        payload
    }
}

impl From<&str> for Progress {
    fn from(message: &str) -> Self {
        Progress::new().message(message)
    }
}

impl From<String> for Progress {
    fn from(message: String) -> Self {
        Progress::new().message(message)
    }
}

impl From<EventData> for Progress {
    fn from(data: EventData) -> Self {
        Progress::new().data(data)
    }
}

/// The error recorded by [`Job::failed`], serialized as `{message, stack?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl JobFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Capture an error's message and its `source()` chain, one cause per line.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            stack: if causes.is_empty() {
                None
            } else {
                Some(causes.join("\n"))
            },
        }
    }
}

impl From<&str> for JobFailure {
    fn from(message: &str) -> Self {
        JobFailure::new(message)
    }
}

impl From<String> for JobFailure {
    fn from(message: String) -> Self {
        JobFailure::new(message)
    }
}

impl From<Value> for JobFailure {
    fn from(value: Value) -> Self {
        match value {
            Value::String(message) => JobFailure::new(message),
            other => JobFailure::new(other.to_string()),
        }
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for JobFailure {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        JobFailure::from_error(err.as_ref())
    }
}

impl From<crate::Error> for JobFailure {
    fn from(err: crate::Error) -> Self {
        JobFailure::from_error(&err)
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

struct JobInner {
    events: Vec<Event>,
    state: JobState,
}

impl JobInner {
    /// Wall-clock now, never earlier than the last recorded event.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.events.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        }
    }
}

/// One tracked unit of work.
///
/// A job records a `started` event on creation, accepts any number of progress
/// events, and closes with exactly one of [`done`](Job::done),
/// [`failed`](Job::failed), [`skip`](Job::skip) or [`review`](Job::review).
/// Later calls are silently ignored, so racing completion paths in host code
/// cannot produce a second outcome or a second delivery.
///
/// All methods take `&self`; wrap the job in an `Arc` to share it across tasks.
pub struct Job {
    id: String,
    external_id: Option<String>,
    inner: Mutex<JobInner>,
    deliver: Arc<dyn Deliver>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("external_id", &self.external_id)
            .field("state", &inner.state)
            .field("events", &inner.events.len())
            .finish()
    }
}

impl Job {
    /// Create an open job and record its `started` event.
    pub fn new(id: impl Into<String>, options: JobOptions, deliver: Arc<dyn Deliver>) -> Self {
        let id = id.into();

        let mut data = EventData::new();
        data.insert("jobType".into(), Value::String(options.job_type));
        if let Some(entity) = options.entity {
            if let Ok(entity) = serde_json::to_value(entity) {
                data.insert("entity".into(), entity);
            }
        }
        if !options.metadata.is_empty() {
            data.insert("metadata".into(), Value::Object(options.metadata));
        }

        let started = Event::new(id.clone(), EventKind::Started, Utc::now(), data)
            .with_external_id(options.external_id.clone());

        Self {
            id,
            external_id: options.external_id,
            inner: Mutex::new(JobInner {
                events: vec![started],
                state: JobState::Open,
            }),
            deliver,
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The job's unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The idempotency key given at creation, if any.
    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    /// Returns `true` once a terminal event has been recorded.
    pub fn is_completed(&self) -> bool {
        self.state() == JobState::Completed
    }

    /// A snapshot of the events recorded so far, in order.
    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    /// Record a progress event. Ignored once the job is completed.
    ///
    /// ```rust
    /// # use jobtrail::{Job, JobOptions, Progress};
    /// # fn demo(job: &Job) {
    /// job.log_event("fetched 120 rows");
    /// job.log_event(Progress::new().message("page done").field("page", 3));
    /// # }
    /// ```
    pub fn log_event(&self, progress: impl Into<Progress>) {
        let mut inner = self.lock();
        if inner.state == JobState::Completed {
            tracing::debug!(job_id = %self.id, "ignoring progress event on completed job");
            return;
        }
        let timestamp = inner.next_timestamp();
        let event = Event::new(
            self.id.clone(),
            EventKind::Progress,
            timestamp,
            progress.into().into_data(),
        );
        inner.events.push(event);
    }

    /// Complete the job successfully, optionally with a result value.
    pub async fn done(&self, result: Option<Value>) {
        let mut data = EventData::new();
        if let Some(result) = result {
            data.insert("result".into(), result);
        }
        self.complete(EventKind::Done, data, true).await;
    }

    /// Complete the job as failed.
    ///
    /// Accepts a message, a JSON value, a boxed error or a crate [`Error`](crate::Error).
    /// For any other error type, keep its `source()` chain with
    /// [`JobFailure::from_error`]:
    ///
    /// ```rust
    /// # use jobtrail::{Job, JobFailure};
    /// # async fn demo(job: &Job) {
    /// if let Err(e) = std::fs::read("report.csv") {
    ///     job.failed(JobFailure::from_error(&e)).await;
    /// }
    /// # }
    /// ```
    pub async fn failed(&self, error: impl Into<JobFailure>) {
        let failure = error.into();
        let mut data = EventData::new();
        let error = serde_json::to_value(&failure)
            .unwrap_or_else(|_| Value::String(failure.message.clone()));
        data.insert("error".into(), error);
        self.complete(EventKind::Failed, data, true).await;
    }

    /// Complete the job as skipped.
    pub async fn skip(&self, reason: impl Into<String>) {
        self.complete(EventKind::Skipped, reason_data(reason), false).await;
    }

    /// Complete the job but flag it for human review.
    pub async fn review(&self, reason: impl Into<String>) {
        self.complete(EventKind::Review, reason_data(reason), false).await;
    }

    async fn complete(&self, kind: EventKind, mut data: EventData, with_duration: bool) {
        let events = {
            let mut inner = self.lock();
            if inner.state == JobState::Completed {
                tracing::debug!(job_id = %self.id, kind = %kind, "job already completed");
                return;
            }

            let now = inner.next_timestamp();
            if with_duration {
                let started_at = inner
                    .events
                    .first()
                    .filter(|e| e.kind == EventKind::Started)
                    .map_or(now, |e| e.timestamp);
                let duration_ms = (now - started_at).num_milliseconds().max(0);
                data.insert("durationMs".into(), Value::from(duration_ms));
            }

            inner
                .events
                .push(Event::new(self.id.clone(), kind, now, data));
            inner.state = JobState::Completed;
            inner.events.clone()
        };

        tracing::debug!(job_id = %self.id, kind = %kind, events = events.len(), "job completed");
        self.deliver.deliver(events).await;
    }
}

fn reason_data(reason: impl Into<String>) -> EventData {
    let mut data = EventData::new();
    data.insert("message".into(), Value::String(reason.into()));
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Collect {
        batches: Mutex<Vec<Vec<Event>>>,
    }

    impl Deliver for Collect {
        fn deliver(&self, events: Vec<Event>) -> BoxFuture<'_, ()> {
            self.batches.lock().unwrap().push(events);
            Box::pin(async {})
        }
    }

    fn new_job(options: JobOptions) -> (Job, Arc<Collect>) {
        let sink = Arc::new(Collect::default());
        (Job::new("job-1", options, sink.clone()), sink)
    }

    #[test]
    fn test_started_event_on_creation() {
        let (job, _) = new_job(
            JobOptions::new("invoice.sync")
                .entity(Entity::new("invoice", "inv_1").human_ref("INV-001"))
                .external_id("ext-1")
                .meta("region", "eu"),
        );

        let events = job.events();
        assert_eq!(events.len(), 1);
        let started = &events[0];
        assert_eq!(started.kind, EventKind::Started);
        assert_eq!(started.external_id.as_deref(), Some("ext-1"));
        assert_eq!(started.get("jobType"), Some(&json!("invoice.sync")));
        assert_eq!(
            started.get("entity"),
            Some(&json!({"type": "invoice", "id": "inv_1", "humanRef": "INV-001"}))
        );
        assert_eq!(started.get("metadata"), Some(&json!({"region": "eu"})));
        assert_eq!(job.state(), JobState::Open);
    }

    #[test]
    fn test_empty_metadata_omitted() {
        let (job, _) = new_job(JobOptions::new("noop"));
        let started = &job.events()[0];
        assert!(started.get("metadata").is_none());
        assert!(started.get("entity").is_none());
        assert!(started.external_id.is_none());
    }

    #[test]
    fn test_progress_payload_merge() {
        let (job, _) = new_job(JobOptions::new("t"));
        job.log_event("plain");
        job.log_event(Progress::new().message("msg").field("count", 3));
        job.log_event(Progress::new().message("lost").field("message", "wins"));
        job.log_event(Progress::new());

        let events = job.events();
        assert_eq!(events[1].data, json!({"message": "plain"}).as_object().unwrap().clone());
        assert_eq!(events[2].get("count"), Some(&json!(3)));
        assert_eq!(events[2].get("message"), Some(&json!("msg")));
        assert_eq!(events[3].get("message"), Some(&json!("wins")));
        assert!(events[4].data.is_empty());
    }

    #[tokio::test]
    async fn test_done_delivers_full_sequence() {
        let (job, sink) = new_job(JobOptions::new("t"));
        job.log_event("step");
        job.done(Some(json!({"rows": 10}))).await;

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let events = &batches[0];
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].kind, EventKind::Done);
        assert_eq!(events[2].get("result"), Some(&json!({"rows": 10})));
        assert!(events[2].get("durationMs").unwrap().as_i64().unwrap() >= 0);
        assert!(job.is_completed());
    }

    #[tokio::test]
    async fn test_done_without_result() {
        let (job, sink) = new_job(JobOptions::new("t"));
        job.done(None).await;
        let batches = sink.batches.lock().unwrap();
        let done = &batches[0][1];
        assert!(done.get("result").is_none());
        assert!(done.get("durationMs").is_some());
    }

    #[tokio::test]
    async fn test_second_terminal_call_is_noop() {
        let (job, sink) = new_job(JobOptions::new("t"));
        job.skip("nothing to do").await;
        job.done(None).await;
        job.failed("late").await;
        job.review("late").await;
        job.log_event("after");

        assert_eq!(job.events().len(), 2);
        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][1].kind, EventKind::Skipped);
        assert_eq!(batches[0][1].get("message"), Some(&json!("nothing to do")));
        assert!(batches[0][1].get("durationMs").is_none());
    }

    #[tokio::test]
    async fn test_failed_normalizes_inputs() {
        let (a, sink_a) = new_job(JobOptions::new("t"));
        a.failed("boom").await;
        assert_eq!(
            sink_a.batches.lock().unwrap()[0][1].get("error"),
            Some(&json!({"message": "boom"}))
        );

        let (b, sink_b) = new_job(JobOptions::new("t"));
        b.failed(json!({"code": 7})).await;
        assert_eq!(
            sink_b.batches.lock().unwrap()[0][1].get("error"),
            Some(&json!({"message": "{\"code\":7}"}))
        );

        let (c, sink_c) = new_job(JobOptions::new("t"));
        c.failed(JobFailure::new("typed").with_stack("at main")).await;
        assert_eq!(
            sink_c.batches.lock().unwrap()[0][1].get("error"),
            Some(&json!({"message": "typed", "stack": "at main"}))
        );
    }

    #[test]
    fn test_failure_from_error_chain() {
        #[derive(Debug)]
        struct Outer(std::io::Error);
        impl fmt::Display for Outer {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "sync failed")
            }
        }
        impl std::error::Error for Outer {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        let failure = JobFailure::from_error(&err);
        assert_eq!(failure.message, "sync failed");
        assert_eq!(failure.stack.as_deref(), Some("disk full"));

        let plain = JobFailure::from_error(&std::io::Error::new(std::io::ErrorKind::Other, "x"));
        assert!(plain.stack.is_none());
    }

    #[tokio::test]
    async fn test_timestamps_non_decreasing() {
        let (job, _) = new_job(JobOptions::new("t"));
        for i in 0..50 {
            job.log_event(format!("step {}", i));
        }
        job.done(None).await;
        let events = job.events();
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
