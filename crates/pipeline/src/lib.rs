//! Asynchronous audit delivery pipeline
//!
//! Captured events flow through four stages:
//!
//! 1. **Redaction** ([`Redactor`]) masks sensitive headers and JSON body
//!    fields and truncates bodies. Only a [`RedactedEvent`] can be queued.
//! 2. **Dispatch** ([`DispatchChannel`]) offers the event to a bounded queue
//!    without waiting. A pool of workers drains the queue into the
//!    [`Publisher`].
//! 3. **Outbox** ([`Outbox`]) journals every event that found the queue full
//!    or whose publish failed, in rotating newline-delimited JSON files.
//! 4. **Replay** ([`ReplayScheduler`]) periodically republishes the journal
//!    and removes what the transport accepted.
//!
//! [`AuditPipeline`] wires the stages together from an
//! [`AuditConfig`](audit_relay_config::AuditConfig).
//!
//! ## Example
//!
//! ```no_run
//! use audit_relay_config::AuditConfigLoader;
//! use audit_relay_core::AuditEvent;
//! use audit_relay_pipeline::AuditPipeline;
//!
//! # async fn run() -> audit_relay_core::Result<()> {
//! let config = AuditConfigLoader::load(None)?;
//! let pipeline = AuditPipeline::from_config(&config)?;
//!
//! let event = AuditEvent::builder()
//!     .with_service(&config.service)
//!     .with_env(&config.env)
//!     .with_request("GET", "/orders/42")
//!     .with_response(200, 7)
//!     .with_identity_from_headers(Some("10.1.2.3"))
//!     .build();
//! pipeline.record(event).await?;
//!
//! let report = pipeline.shutdown().await;
//! assert_eq!(report.lost, 0);
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod metrics;
pub mod outbox;
pub mod pipeline;
pub mod publisher;
pub mod redact;
pub mod scheduler;
pub mod testing;

pub use dispatch::{DispatchChannel, DispatchSettings, ShutdownReport};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use outbox::{Outbox, ReplayReport};
pub use pipeline::AuditPipeline;
pub use publisher::{HttpPublisher, InstrumentedPublisher, LogPublisher, Publisher};
pub use redact::{RedactedEvent, RedactionPolicy, Redactor};
pub use scheduler::ReplayScheduler;
