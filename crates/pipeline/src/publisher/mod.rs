//! Delivery capability and reference transports
//!
//! The pipeline only knows the [`Publisher`] trait. Which transport sits
//! behind it is decided once, when the pipeline is built.

pub mod http;
pub mod log;

pub use http::HttpPublisher;
pub use log::LogPublisher;

use crate::metrics::PipelineMetrics;
use async_trait::async_trait;
use audit_relay_core::{AuditEvent, TransportError};
use std::sync::Arc;
use std::time::Instant;

/// Something that can deliver an audit event downstream
///
/// A returned `Ok` means the transport accepted the event. Every failure is
/// reported as a [`TransportError`]; implementations must not panic.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, event: &AuditEvent) -> Result<(), TransportError>;

    /// Short transport name used in logs
    fn name(&self) -> &'static str;
}

/// Wraps a publisher and records attempts, outcomes and latency
pub struct InstrumentedPublisher {
    inner: Arc<dyn Publisher>,
    metrics: PipelineMetrics,
}

impl InstrumentedPublisher {
    pub fn new(inner: Arc<dyn Publisher>, metrics: PipelineMetrics) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl Publisher for InstrumentedPublisher {
    async fn publish(&self, event: &AuditEvent) -> Result<(), TransportError> {
        self.metrics.record_publish_attempt();
        let started = Instant::now();

        let result = self.inner.publish(event).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(()) => self.metrics.record_publish_success(elapsed),
            Err(e) => {
                self.metrics.record_publish_failure(elapsed);
                tracing::debug!(
                    transport = self.inner.name(),
                    event_id = event.event_id(),
                    transient = e.is_transient(),
                    "Publish failed: {}",
                    e
                );
            }
        }
        result
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingPublisher;

    #[tokio::test]
    async fn test_instrumented_publisher_counts_outcomes() {
        let metrics = PipelineMetrics::new().unwrap();
        let recorder = Arc::new(RecordingPublisher::new());
        let publisher = InstrumentedPublisher::new(recorder.clone(), metrics.clone());
        let event = AuditEvent::builder().with_request("GET", "/").build();

        publisher.publish(&event).await.unwrap();
        recorder.set_failing(true);
        assert!(publisher.publish(&event).await.is_err());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.publish_attempts, 2);
        assert_eq!(snapshot.publish_sent, 1);
        assert_eq!(snapshot.publish_failed, 1);
        assert_eq!(snapshot.publish_latency_samples, 2);
        assert_eq!(publisher.name(), "recording");
        assert_eq!(recorder.published().len(), 1);
    }
}
