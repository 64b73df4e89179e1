#[cfg(feature = "reqwest-transport")]
pub(crate) mod http;

#[cfg(feature = "reqwest-transport")]
pub(crate) use self::http::HttpTransport;

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable future used by the object-safe traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A raw response from the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text. Empty when the server sent none.
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// The wire layer that carries one event batch to the ingestion endpoint.
///
/// A transport makes exactly one request per call and reports whatever status
/// came back. Retries, timeouts and status classification live above it in
/// the sender, so custom transports only need to move bytes.
///
/// The default implementation uses reqwest (enabled via the
/// `reqwest-transport` feature).
///
/// # Example
///
/// ```rust,no_run
/// use jobtrail::transport::{BoxFuture, Response, Transport};
///
/// #[derive(Debug)]
/// struct StdoutTransport;
///
/// impl Transport for StdoutTransport {
///     fn post(&self, body: serde_json::Value) -> BoxFuture<'_, jobtrail::Result<Response>> {
///         Box::pin(async move {
///             println!("{}", body);
///             Ok(Response::new(200, ""))
///         })
///     }
/// }
/// ```
pub trait Transport: Send + Sync + Debug {
    /// POST `body` (shaped `{"events": [...]}`) to the ingestion endpoint.
    ///
    /// Returns `Ok` for any HTTP response, whatever its status, and `Err` only
    /// when no response was received.
    fn post(&self, body: serde_json::Value) -> BoxFuture<'_, crate::Result<Response>>;
}

/// A cloneable, type-erased transport handle.
pub type DynTransport = Arc<dyn Transport>;
