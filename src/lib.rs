#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Allowed pedantic lints
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::ignored_unit_patterns)]
//! # jobtrail - job telemetry for Rust services
//!
//! Track discrete units of work ("jobs"), record what happens to them, and
//! ship the resulting events to an ingestion endpoint without ever letting a
//! delivery problem break the work itself.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jobtrail::{Client, Entity, JobOptions, Progress};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> jobtrail::Result<()> {
//! let client = Client::builder()
//!     .api_key("jt_live_123")
//!     .on_error(|err, events| eprintln!("dropped {} events: {}", events.len(), err))
//!     .build()?;
//!
//! let job = client.create_job(
//!     JobOptions::new("invoice.sync")
//!         .entity(Entity::new("customer", "cus_42").human_ref("ACME Corp"))
//!         .external_id("nightly-2024-06-01"),
//! );
//!
//! job.log_event("fetched invoices");
//! job.log_event(Progress::new().message("page done").field("page", 2));
//!
//! match do_sync().await {
//!     Ok(count) => job.done(Some(json!({"synced": count}))).await,
//!     Err(e) => job.failed(e.to_string()).await,
//! }
//! # Ok(())
//! # }
//! # async fn do_sync() -> Result<u32, std::io::Error> { Ok(3) }
//! ```
//!
//! ## Delivery modes
//!
//! - [`DeliveryMode::PerJob`] (default): each job sends its events in one
//!   request when it completes.
//! - [`DeliveryMode::Batch`]: events from all jobs are buffered and sent
//!   together every `flush_interval`, or as soon as `batch_size` events are
//!   waiting. Call [`Client::shutdown`] before exit.
//!
//! Every request is retried on 5xx, 429, timeouts and network errors with
//! exponential backoff. 400 and 401 are never retried.

pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod job;
pub mod retry;
pub mod sender;
#[cfg(feature = "testing")]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;
pub mod transport;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, DeliveryMode};
pub use errors::{DeliveryError, DeliveryErrorKind, Error, Result};
pub use events::{Event, EventData, EventKind};
pub use job::{Deliver, Entity, Job, JobFailure, JobOptions, JobState, Progress};
pub use retry::RetryConfig;
pub use sender::ErrorHook;
pub use transport::{BoxFuture, DynTransport, Response, Transport};
