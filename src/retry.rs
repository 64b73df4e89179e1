use std::time::Duration;

/// Retry budget and backoff schedule for event delivery.
///
/// A delivery makes one initial request plus up to `max_retries` more. Between
/// attempts the sender sleeps `base_backoff * 2^attempt`, clamped to
/// `max_backoff`, with `attempt` counted from zero. There is no sleep after the
/// final attempt.
///
/// # Example
///
/// ```rust
/// use jobtrail::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::default().with_max_retries(5);
///
/// assert_eq!(config.compute_backoff(0), Duration::from_secs(1));
/// assert_eq!(config.compute_backoff(2), Duration::from_secs(4));
/// assert_eq!(config.compute_backoff(8), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the initial request (default: 3).
    pub max_retries: u32,
    /// Base of the exponential backoff (default: 1s).
    pub base_backoff: Duration,
    /// Upper bound on any single backoff (default: 10s).
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(10_000),
        }
    }
}

impl RetryConfig {
    /// Create a new `RetryConfig` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of retry attempts.
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the backoff base.
    pub fn with_base_backoff(mut self, d: Duration) -> Self {
        self.base_backoff = d;
        self
    }

    /// Set the backoff cap.
    pub fn with_max_backoff(mut self, d: Duration) -> Self {
        self.max_backoff = d;
        self
    }

    /// Total number of requests a failing delivery will make.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after the given zero-indexed failed attempt.
    pub fn compute_backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base_backoff.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        let max_ms = self.max_backoff.as_millis() as u64;
        Duration::from_millis(exp_ms.min(max_ms))
    }
}
