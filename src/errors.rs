use std::fmt;

// ---------------------------------------------------------------------------
// Main crate error type
// ---------------------------------------------------------------------------

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Client misconfiguration, e.g. a missing API key.
    #[error("configuration error: {0}")]
    Config(String),

    /// Events could not be delivered to the ingestion endpoint.
    #[error("{0}")]
    Delivery(Box<DeliveryError>),

    /// Network-level failure before a response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// The delivery failure details, if this is a delivery error.
    pub fn as_delivery(&self) -> Option<&DeliveryError> {
        match self {
            Error::Delivery(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DeliveryError> for Error {
    fn from(err: DeliveryError) -> Self {
        Error::Delivery(Box::new(err))
    }
}

#[cfg(feature = "reqwest-transport")]
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Delivery error
// ---------------------------------------------------------------------------

/// Why a delivery gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// The endpoint rejected the request (400 or 401). Never retried.
    Rejected,
    /// Every attempt failed with a retryable status, timeout, or network error.
    RetriesExhausted,
}

/// A delivery that will not be attempted again by the sender.
///
/// Passed to the client's failure observer once per failed delivery.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    /// HTTP status of the last response, `None` for timeouts and network errors.
    pub status: Option<u16>,
    pub message: String,
    /// Number of requests made, including the first.
    pub attempts: u32,
    /// Number of events in the failed batch.
    pub event_count: usize,
}

impl DeliveryError {
    pub(crate) fn new(
        kind: DeliveryErrorKind,
        status: Option<u16>,
        message: impl Into<String>,
        attempts: u32,
        event_count: usize,
    ) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            attempts,
            event_count,
        }
    }

    /// Returns `true` if the endpoint rejected the request outright.
    pub fn is_rejected(&self) -> bool {
        self.kind == DeliveryErrorKind::Rejected
    }

    /// Returns `true` if the retry budget ran out.
    pub fn is_exhausted(&self) -> bool {
        self.kind == DeliveryErrorKind::RetriesExhausted
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeliveryErrorKind::Rejected => write!(f, "delivery rejected")?,
            DeliveryErrorKind::RetriesExhausted => {
                write!(f, "delivery failed after {} attempts", self.attempts)?;
            }
        }
        if let Some(status) = self.status {
            write!(f, " (HTTP {})", status)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for DeliveryError {}

// ---------------------------------------------------------------------------
// Result type alias
// ---------------------------------------------------------------------------

pub type Result<T> = std::result::Result<T, Error>;
