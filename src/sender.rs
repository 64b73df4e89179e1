//! Retrying event delivery.
//!
//! [`EventSender`] turns a slice of events into one request body, pushes it
//! through a [`Transport`](crate::Transport), and decides from the outcome
//! whether to stop, retry, or give up.

use crate::errors::{DeliveryError, DeliveryErrorKind, Error};
use crate::events::{Event, EventBatch};
use crate::retry::RetryConfig;
use crate::transport::{DynTransport, Response};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked once for every delivery the sender gives up on.
///
/// Receives the failure and the events that were not delivered. Never called
/// for successful deliveries.
pub type ErrorHook = Arc<dyn Fn(&DeliveryError, &[Event]) + Send + Sync>;

/// Result of a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    Delivered(u16),
    Retryable {
        status: Option<u16>,
        message: String,
    },
    Rejected {
        status: u16,
        message: String,
    },
}

/// Sends event batches with bounded retries and exponential backoff.
#[derive(Clone)]
pub(crate) struct EventSender {
    transport: DynTransport,
    retry: RetryConfig,
    request_timeout: Duration,
    disabled: bool,
    on_error: Option<ErrorHook>,
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender")
            .field("transport", &self.transport)
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .field("disabled", &self.disabled)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl EventSender {
    pub fn new(
        transport: DynTransport,
        retry: RetryConfig,
        request_timeout: Duration,
        disabled: bool,
        on_error: Option<ErrorHook>,
    ) -> Self {
        Self {
            transport,
            retry,
            request_timeout,
            disabled,
            on_error,
        }
    }

    /// Deliver `events` as a single batch.
    ///
    /// Succeeds immediately without any request when `events` is empty or the
    /// sender is disabled. On failure the error hook has already been called
    /// by the time this returns.
    pub async fn send(&self, events: &[Event]) -> crate::Result<()> {
        if self.disabled || events.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_value(EventBatch { events })?;
        let max_attempts = self.retry.max_attempts();
        let mut last_status = None;
        let mut last_message = String::new();

        for attempt in 0..max_attempts {
            match self.attempt(body.clone()).await {
                AttemptOutcome::Delivered(status) => {
                    tracing::debug!(
                        events = events.len(),
                        attempt = attempt + 1,
                        status,
                        "events delivered"
                    );
                    return Ok(());
                }
                AttemptOutcome::Rejected { status, message } => {
                    let err = DeliveryError::new(
                        DeliveryErrorKind::Rejected,
                        Some(status),
                        message,
                        attempt + 1,
                        events.len(),
                    );
                    return Err(self.give_up(err, events));
                }
                AttemptOutcome::Retryable { status, message } => {
                    tracing::debug!(
                        events = events.len(),
                        attempt = attempt + 1,
                        status = ?status,
                        error = %message,
                        "delivery attempt failed"
                    );
                    last_status = status;
                    last_message = message;
                }
            }

            if attempt + 1 < max_attempts {
                tokio::time::sleep(self.retry.compute_backoff(attempt)).await;
            }
        }

        let err = DeliveryError::new(
            DeliveryErrorKind::RetriesExhausted,
            last_status,
            last_message,
            max_attempts,
            events.len(),
        );
        Err(self.give_up(err, events))
    }

    async fn attempt(&self, body: serde_json::Value) -> AttemptOutcome {
        match tokio::time::timeout(self.request_timeout, self.transport.post(body)).await {
            Ok(Ok(response)) => classify(&response),
            Ok(Err(e)) => AttemptOutcome::Retryable {
                status: None,
                message: e.to_string(),
            },
            Err(_) => AttemptOutcome::Retryable {
                status: None,
                message: format!(
                    "request timed out after {}ms",
                    self.request_timeout.as_millis()
                ),
            },
        }
    }

    fn give_up(&self, err: DeliveryError, events: &[Event]) -> Error {
        tracing::warn!(
            events = events.len(),
            attempts = err.attempts,
            status = ?err.status,
            error = %err.message,
            "event delivery failed"
        );
        if let Some(hook) = &self.on_error {
            hook(&err, events);
        }
        err.into()
    }
}

// ---------------------------------------------------------------------------
// Status classification
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// 2xx (including 207 partial success) delivers; 400 and 401 are final;
/// everything else is worth another try.
pub(crate) fn classify(response: &Response) -> AttemptOutcome {
    match response.status {
        200..=299 => AttemptOutcome::Delivered(response.status),
        400 | 401 => AttemptOutcome::Rejected {
            status: response.status,
            message: error_message(response),
        },
        status => AttemptOutcome::Retryable {
            status: Some(status),
            message: error_message(response),
        },
    }
}

fn error_message(response: &Response) -> String {
    if let Ok(ErrorBody { error: Some(msg) }) = serde_json::from_str(&response.body) {
        return msg;
    }
    let text = response.body.trim();
    if text.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        text.to_string()
    }
}
