use crate::config::{ClientConfig, DeliveryMode};
use crate::errors::{DeliveryError, Error};
use crate::events::Event;
use crate::job::{Deliver, Job, JobOptions};
use crate::retry::RetryConfig;
use crate::sender::{ErrorHook, EventSender};
use crate::transport::{BoxFuture, DynTransport};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ---------------------------------------------------------------------------
// Client builder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    retry: RetryConfig,
    headers: HashMap<String, String>,
    on_error: Option<ErrorHook>,
    transport: Option<DynTransport>,
    #[cfg(feature = "reqwest-transport")]
    http_client: Option<reqwest::Client>,
}

impl ClientBuilder {
    fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            retry: RetryConfig::default(),
            headers: HashMap::new(),
            on_error: None,
            transport: None,
            #[cfg(feature = "reqwest-transport")]
            http_client: None,
        }
    }

    /// Start from a loaded [`ClientConfig`]. Later setters override it.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the bearer credential. Required.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    /// Set the ingestion service address.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Choose per-job or batch delivery. Defaults to per-job.
    pub fn mode(mut self, mode: DeliveryMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Batch mode: how often the background task flushes the buffer.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Batch mode: flush as soon as the buffer holds this many events.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the number of retries after the first attempt.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    /// Set the full retry schedule, including backoff bounds.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.max_retries = retry.max_retries;
        self.retry = retry;
        self
    }

    /// Set the per-attempt request timeout. Defaults to 10 seconds.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Suppress all network activity.
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.config.disabled = disabled;
        self
    }

    /// Observe deliveries that were rejected or ran out of retries.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DeliveryError, &[Event]) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Add a custom HTTP header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Provide a custom reqwest HTTP client.
    #[cfg(feature = "reqwest-transport")]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Replace the HTTP transport entirely.
    pub fn transport(mut self, transport: DynTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client.
    pub fn build(self) -> crate::Result<Client> {
        let config = self.config;
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Error::Config("api_key is required".into()))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                #[cfg(feature = "reqwest-transport")]
                let transport =
                    default_transport(&config.base_url, api_key, self.headers, self.http_client)?;
                #[cfg(not(feature = "reqwest-transport"))]
                let transport = default_transport(&config.base_url, api_key, self.headers)?;
                transport
            }
        };

        let retry = RetryConfig {
            max_retries: config.max_retries,
            ..self.retry
        };
        let sender = EventSender::new(
            transport,
            retry,
            config.request_timeout(),
            config.disabled,
            self.on_error,
        );

        Ok(Client {
            shared: Arc::new(Shared {
                mode: config.mode,
                batch_size: config.batch_size,
                flush_interval: config.flush_interval(),
                sender: Arc::new(sender),
                buffer: Mutex::new(Vec::new()),
                flushing: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                timer: Mutex::new(None),
            }),
        })
    }
}

#[cfg(feature = "reqwest-transport")]
fn default_transport(
    base_url: &str,
    api_key: String,
    headers: HashMap<String, String>,
    http_client: Option<reqwest::Client>,
) -> crate::Result<DynTransport> {
    let transport = crate::transport::HttpTransport::new(
        base_url,
        crate::transport::http::TransportConfig {
            api_key,
            headers,
            http_client,
        },
    );
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "reqwest-transport"))]
fn default_transport(
    _base_url: &str,
    _api_key: String,
    _headers: HashMap<String, String>,
) -> crate::Result<DynTransport> {
    Err(Error::Config(
        "no transport configured: enable `reqwest-transport` or call `transport()`".into(),
    ))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Creates jobs and ships their events.
///
/// In [`DeliveryMode::PerJob`] each job sends its events when it completes.
/// In [`DeliveryMode::Batch`] completed jobs append to a shared buffer that a
/// background task flushes every `flush_interval`, or immediately once it
/// holds `batch_size` events. Call [`shutdown`](Client::shutdown) before
/// exiting to flush whatever is left.
///
/// Delivery failures never surface from job methods. They are reported to the
/// `on_error` observer and, in batch mode, the events go back to the front of
/// the buffer for the next flush.
///
/// # Example
///
/// ```rust,no_run
/// use jobtrail::{Client, DeliveryMode, JobOptions};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> jobtrail::Result<()> {
/// let client = Client::builder()
///     .api_key("jt_live_123")
///     .mode(DeliveryMode::Batch)
///     .build()?;
///
/// let job = client.create_job(JobOptions::new("invoice.sync").external_id("run-42"));
/// job.log_event("fetched invoices");
/// job.done(Some(json!({"synced": 12}))).await;
///
/// client.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("mode", &self.shared.mode)
            .field("batch_size", &self.shared.batch_size)
            .field("pending_events", &self.pending_events())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The delivery mode this client was built with.
    pub fn mode(&self) -> DeliveryMode {
        self.shared.mode
    }

    /// Start tracking a new job. Records its `started` event immediately.
    pub fn create_job(&self, options: impl Into<JobOptions>) -> Job {
        let deliver: Arc<dyn Deliver> = match self.shared.mode {
            DeliveryMode::PerJob => Arc::new(Immediate {
                sender: self.shared.sender.clone(),
            }),
            DeliveryMode::Batch => Arc::new(Buffered {
                shared: self.shared.clone(),
            }),
        };
        Job::new(uuid::Uuid::new_v4().to_string(), options.into(), deliver)
    }

    /// Deliver everything currently buffered.
    ///
    /// Returns immediately if the buffer is empty or another flush is already
    /// running. On failure the events are put back at the front of the buffer.
    pub async fn flush(&self) {
        self.shared.flush().await;
    }

    /// Stop the background flush and deliver what is left. Idempotent.
    pub async fn shutdown(&self) {
        self.shared.shutdown().await;
    }

    /// Number of events waiting in the batch buffer.
    pub fn pending_events(&self) -> usize {
        self.shared.lock_buffer().len()
    }

    /// Returns `true` once [`shutdown`](Client::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Shared state and flush scheduling
// ---------------------------------------------------------------------------

struct FlushTimer {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

struct Shared {
    mode: DeliveryMode,
    batch_size: usize,
    flush_interval: Duration,
    sender: Arc<EventSender>,
    buffer: Mutex<Vec<Event>>,
    flushing: AtomicBool,
    shutdown: AtomicBool,
    timer: Mutex<Option<FlushTimer>>,
}

impl Shared {
    fn lock_buffer(&self) -> MutexGuard<'_, Vec<Event>> {
        lock(&self.buffer)
    }

    async fn enqueue(self: &Arc<Self>, events: Vec<Event>) {
        let len = {
            let mut buffer = self.lock_buffer();
            buffer.extend(events);
            buffer.len()
        };
        self.ensure_timer();

        if len >= self.batch_size {
            tracing::debug!(pending = len, batch_size = self.batch_size, "batch size reached");
            self.flush().await;
        }
    }

    /// Arm the periodic flush unless it is running or the client is shut down.
    fn ensure_timer(self: &Arc<Self>) {
        let mut timer = lock(&self.timer);
        if timer.is_some() || self.shutdown.load(Ordering::Acquire) {
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(flush_loop(
            Arc::downgrade(self),
            self.flush_interval,
            stop_rx,
        ));
        *timer = Some(FlushTimer { handle, stop });
    }

    async fn flush(&self) {
        let Some(_guard) = FlushGuard::acquire(&self.flushing) else {
            tracing::debug!("flush already in flight");
            return;
        };

        // Declared after `_guard` so the batch is restored before the flag clears.
        let mut batch = Detached::take(&self.buffer);
        if batch.events.is_empty() {
            return;
        }

        tracing::debug!(events = batch.events.len(), "flushing event buffer");
        let result = self.sender.send(&batch.events).await;
        match result {
            Ok(()) => batch.delivered = true,
            Err(e) => tracing::debug!(
                error = %e,
                events = batch.events.len(),
                "flush failed, returning events to buffer"
            ),
        }
    }

    async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let timer = lock(&self.timer).take();
        if let Some(timer) = timer {
            let _ = timer.stop.send(true);
            if let Err(e) = timer.handle.await {
                tracing::error!(error = %e, "flush task panicked");
            }
        }

        // A manual flush may still be running.
        while self.flushing.load(Ordering::Acquire) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.flush().await;
        tracing::debug!(pending = self.lock_buffer().len(), "client shut down");
    }
}

/// Periodic flush. Holds only a weak reference so it never keeps the client
/// alive, and exits when stopped or when the client is dropped.
async fn flush_loop(weak: Weak<Shared>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // skip first immediate tick

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }

        let Some(shared) = weak.upgrade() else {
            break;
        };
        shared.flush().await;
    }
}

/// Holds the single-flight flag for the duration of one flush.
struct FlushGuard<'a>(&'a AtomicBool);

impl<'a> FlushGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlushGuard(flag))
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A batch taken out of the buffer for one flush.
///
/// Unless marked delivered, the events go back to the front of the buffer on
/// drop, so a failed send and a flush future dropped mid-send both keep them.
struct Detached<'a> {
    buffer: &'a Mutex<Vec<Event>>,
    events: Vec<Event>,
    delivered: bool,
}

impl<'a> Detached<'a> {
    fn take(buffer: &'a Mutex<Vec<Event>>) -> Self {
        let events = std::mem::take(&mut *lock(buffer));
        Self {
            buffer,
            events,
            delivered: false,
        }
    }
}

impl Drop for Detached<'_> {
    fn drop(&mut self) {
        if self.delivered || self.events.is_empty() {
            return;
        }
        let mut buffer = lock(self.buffer);
        let appended = std::mem::replace(&mut *buffer, std::mem::take(&mut self.events));
        buffer.extend(appended);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Delivery strategies
// ---------------------------------------------------------------------------

/// Per-job mode: send straight away, swallow failures after the observer ran.
#[derive(Debug)]
struct Immediate {
    sender: Arc<EventSender>,
}

impl Deliver for Immediate {
    fn deliver(&self, events: Vec<Event>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.sender.send(&events).await {
                tracing::debug!(
                    error = %e,
                    events = events.len(),
                    "dropping undelivered job events"
                );
            }
        })
    }
}

/// Batch mode: append to the shared buffer.
struct Buffered {
    shared: Arc<Shared>,
}

impl fmt::Debug for Buffered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffered")
            .field("batch_size", &self.shared.batch_size)
            .finish()
    }
}

impl Deliver for Buffered {
    fn deliver(&self, events: Vec<Event>) -> BoxFuture<'_, ()> {
        Box::pin(self.shared.enqueue(events))
    }
}
