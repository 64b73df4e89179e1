//! Job telemetry event types.
//!
//! An [`Event`] is an immutable record of something that happened to a job:
//! it started, reported progress, or reached its outcome. Events are built by
//! [`Job`](crate::Job) and shipped to the ingestion endpoint inside an
//! [`EventBatch`].
//!
//! # Example
//!
//! ```rust
//! use jobtrail::events::{EventKind, EVENT_JOB_DONE};
//!
//! assert_eq!(EventKind::Done.as_str(), EVENT_JOB_DONE);
//! assert!(EventKind::Done.is_terminal());
//! assert!(!EventKind::Progress.is_terminal());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Event type constants
// ---------------------------------------------------------------------------

pub const EVENT_JOB_STARTED: &str = "job.started";
pub const EVENT_JOB_PROGRESS: &str = "job.event";
pub const EVENT_JOB_DONE: &str = "job.done";
pub const EVENT_JOB_FAILED: &str = "job.failed";
pub const EVENT_JOB_SKIPPED: &str = "job.skipped";
pub const EVENT_JOB_REVIEW: &str = "job.review";

/// Payload carried by an event. Keys are unique; absent values are omitted.
pub type EventData = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Event kind
// ---------------------------------------------------------------------------

/// The kind of an [`Event`], serialized with its dotted wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// First event of every job.
    #[serde(rename = "job.started")]
    Started,
    /// Intermediate progress report.
    #[serde(rename = "job.event")]
    Progress,
    /// Successful completion.
    #[serde(rename = "job.done")]
    Done,
    /// Failed completion.
    #[serde(rename = "job.failed")]
    Failed,
    /// The job decided there was nothing to do.
    #[serde(rename = "job.skipped")]
    Skipped,
    /// The job finished but needs a human to look at it.
    #[serde(rename = "job.review")]
    Review,
}

impl EventKind {
    /// Returns `true` for the kinds that close a job (done, failed, skipped, review).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::Done | EventKind::Failed | EventKind::Skipped | EventKind::Review
        )
    }

    /// The dotted wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Started => EVENT_JOB_STARTED,
            EventKind::Progress => EVENT_JOB_PROGRESS,
            EventKind::Done => EVENT_JOB_DONE,
            EventKind::Failed => EVENT_JOB_FAILED,
            EventKind::Skipped => EVENT_JOB_SKIPPED,
            EventKind::Review => EVENT_JOB_REVIEW,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A single telemetry event belonging to exactly one job.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Identifier of the owning job.
    pub job_id: String,

    /// Idempotency key supplied at job creation. Only set on the `started` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// When it happened.
    pub timestamp: DateTime<Utc>,

    /// Kind-specific payload.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub data: EventData,
}

impl Event {
    pub(crate) fn new(
        job_id: impl Into<String>,
        kind: EventKind,
        timestamp: DateTime<Utc>,
        data: EventData,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            external_id: None,
            kind,
            timestamp,
            data,
        }
    }

    pub(crate) fn with_external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id;
        self
    }

    /// Look up a payload value by key.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

/// Request body accepted by the ingestion endpoint.
#[derive(Debug, Serialize)]
pub(crate) struct EventBatch<'a> {
    pub events: &'a [Event],
}
