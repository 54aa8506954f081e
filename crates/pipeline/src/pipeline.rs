//! The assembled pipeline: redactor, dispatch channel, outbox and replay

use crate::dispatch::{DispatchChannel, DispatchSettings, ShutdownReport};
use crate::metrics::PipelineMetrics;
use crate::outbox::{Outbox, ReplayReport};
use crate::publisher::{HttpPublisher, InstrumentedPublisher, LogPublisher, Publisher};
use crate::redact::{RedactionPolicy, Redactor};
use crate::scheduler::ReplayScheduler;
use audit_relay_config::{AuditConfig, FailurePolicy, TransportKind};
use audit_relay_core::{AuditError, AuditEvent, Result};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Entry point for the capture boundary
///
/// Owns every moving part of the delivery path. Build it once at startup,
/// call [`record`](Self::record) for every captured interaction and
/// [`shutdown`](Self::shutdown) before the process exits.
pub struct AuditPipeline {
    redactor: Redactor,
    channel: Option<DispatchChannel>,
    outbox: Option<Arc<Outbox>>,
    scheduler: Option<ReplayScheduler>,
    metrics: PipelineMetrics,
    failure_policy: FailurePolicy,
    shutdown_grace: Duration,
}

impl AuditPipeline {
    /// Build the pipeline with the transport named in the configuration
    pub fn from_config(config: &AuditConfig) -> Result<Self> {
        let publisher: Arc<dyn Publisher> = match config.transport.kind {
            TransportKind::Http => Arc::new(HttpPublisher::new(&config.transport)?),
            TransportKind::Log => Arc::new(LogPublisher::new()),
        };
        Self::start(config, publisher)
    }

    /// Build the pipeline around `publisher` with metrics on a private registry
    pub fn start(config: &AuditConfig, publisher: Arc<dyn Publisher>) -> Result<Self> {
        Self::start_with_registry(config, publisher, Registry::new())
    }

    /// Build the pipeline and register its metrics on `registry`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_with_registry(
        config: &AuditConfig,
        publisher: Arc<dyn Publisher>,
        registry: Registry,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = PipelineMetrics::register(registry).map_err(|e| AuditError::Metrics {
            message: e.to_string(),
        })?;
        let redactor = Redactor::new(RedactionPolicy::from_config(config))?;

        if !config.enabled {
            info!("Audit pipeline disabled, events will be discarded");
            return Ok(Self {
                redactor,
                channel: None,
                outbox: None,
                scheduler: None,
                metrics,
                failure_policy: config.failure_policy,
                shutdown_grace: config.shutdown_grace(),
            });
        }

        let publisher: Arc<dyn Publisher> =
            Arc::new(InstrumentedPublisher::new(publisher, metrics.clone()));

        let outbox = if config.outbox.enabled {
            Some(Arc::new(Outbox::open(
                &config.outbox,
                Arc::clone(&publisher),
                metrics.clone(),
            )?))
        } else {
            warn!("Audit outbox disabled, undeliverable events will be dropped");
            None
        };

        let channel = DispatchChannel::start(
            DispatchSettings::from_config(config),
            Arc::clone(&publisher),
            outbox.clone(),
            metrics.clone(),
        );
        let scheduler = outbox.as_ref().map(|outbox| {
            ReplayScheduler::spawn(Arc::clone(outbox), config.outbox.replay_interval())
        });

        info!(
            service = %config.service,
            env = %config.env,
            transport = publisher.name(),
            failure_policy = ?config.failure_policy,
            "Audit pipeline started"
        );

        Ok(Self {
            redactor,
            channel: Some(channel),
            outbox,
            scheduler,
            metrics,
            failure_policy: config.failure_policy,
            shutdown_grace: config.shutdown_grace(),
        })
    }

    /// Redact `event` and queue it for delivery
    ///
    /// Under `FailOpen` this always succeeds; failures are logged. Under
    /// `FailClosed` an event the pipeline could neither queue nor persist is
    /// reported as [`AuditError::Pipeline`].
    pub async fn record(&self, event: AuditEvent) -> Result<()> {
        let Some(channel) = &self.channel else {
            return Ok(());
        };

        let redacted = self.redactor.redact(&event);
        let event_id = redacted.event_id().to_string();
        match channel.submit(redacted).await {
            Ok(()) => Ok(()),
            Err(e) => match self.failure_policy {
                FailurePolicy::FailOpen => {
                    warn!(event_id = %event_id, "Audit event dropped: {}", e);
                    Ok(())
                }
                FailurePolicy::FailClosed => Err(AuditError::Pipeline(e)),
            },
        }
    }

    /// Whether events are actually processed
    pub fn is_enabled(&self) -> bool {
        self.channel.is_some()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn outbox(&self) -> Option<&Arc<Outbox>> {
        self.outbox.as_ref()
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Run a replay now instead of waiting for the scheduler
    pub async fn replay_now(&self) -> Option<ReplayReport> {
        match &self.outbox {
            Some(outbox) => Some(outbox.replay().await),
            None => None,
        }
    }

    /// Drain the queue within the configured grace period and stop replay
    pub async fn shutdown(mut self) -> ShutdownReport {
        let report = match self.channel.take() {
            Some(channel) => channel.shutdown(self.shutdown_grace).await,
            None => ShutdownReport {
                drained_within_grace: true,
                ..ShutdownReport::default()
            },
        };
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
        info!(
            outboxed = report.outboxed,
            lost = report.lost,
            "Audit pipeline shut down"
        );
        report
    }
}

impl std::fmt::Debug for AuditPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditPipeline")
            .field("channel", &self.channel)
            .field("outbox", &self.outbox)
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingPublisher;
    use audit_relay_core::REDACTION_MARKER;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> AuditConfig {
        AuditConfig::builder()
            .with_service("orders", "test")
            .with_bodies(true, false)
            .with_queue_capacity(16)
            .with_worker_threads(1)
            .with_shutdown_grace_ms(2000)
            .with_outbox_dir(dir.path())
            .build()
    }

    #[tokio::test]
    async fn test_record_redacts_before_publishing() {
        let temp_dir = TempDir::new().unwrap();
        let publisher = Arc::new(RecordingPublisher::new());
        let pipeline = AuditPipeline::start(&config(&temp_dir), publisher.clone()).unwrap();

        let event = AuditEvent::builder()
            .with_request("POST", "/login")
            .with_header("Authorization", "secret123")
            .with_request_body(Some(r#"{"password":"abc123","name":"bob"}"#.to_string()))
            .with_response_body(Some("welcome".to_string()))
            .build();
        pipeline.record(event).await.unwrap();
        pipeline.shutdown().await;

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].header("authorization"), Some(REDACTION_MARKER));
        assert_eq!(
            published[0].request_body(),
            Some(r#"{"password":"██REDACTED██","name":"bob"}"#)
        );
        assert_eq!(published[0].response_body(), None);
    }

    #[tokio::test]
    async fn test_disabled_pipeline_discards_events() {
        let temp_dir = TempDir::new().unwrap();
        let publisher = Arc::new(RecordingPublisher::new());
        let mut config = config(&temp_dir);
        config.enabled = false;

        let pipeline = AuditPipeline::start(&config, publisher.clone()).unwrap();
        assert!(!pipeline.is_enabled());
        pipeline
            .record(AuditEvent::builder().build())
            .await
            .unwrap();
        assert!(pipeline.replay_now().await.is_none());
        pipeline.shutdown().await;

        assert_eq!(publisher.attempts(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_construction() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(&temp_dir);
        config.worker_threads = 0;

        let err = AuditPipeline::start(&config, Arc::new(RecordingPublisher::new())).unwrap_err();
        assert!(matches!(err, AuditError::Config(_)));
    }

    #[tokio::test]
    async fn test_second_pipeline_on_same_outbox_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let first = AuditPipeline::start(&config(&temp_dir), Arc::new(RecordingPublisher::new()))
            .unwrap();

        let err = AuditPipeline::start(&config(&temp_dir), Arc::new(RecordingPublisher::new()))
            .unwrap_err();
        assert!(matches!(
            err,
            AuditError::Outbox(audit_relay_core::OutboxError::Locked { .. })
        ));
        first.shutdown().await;
    }

    #[tokio::test]
    async fn test_log_transport_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(&temp_dir);
        config.transport.kind = TransportKind::Log;

        let pipeline = AuditPipeline::from_config(&config).unwrap();
        pipeline
            .record(AuditEvent::builder().with_request("GET", "/health").build())
            .await
            .unwrap();
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_metrics_share_host_registry() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Registry::new();
        let pipeline = AuditPipeline::start_with_registry(
            &config(&temp_dir),
            Arc::new(RecordingPublisher::new()),
            registry.clone(),
        )
        .unwrap();

        pipeline.record(AuditEvent::builder().build()).await.unwrap();
        pipeline.shutdown().await;

        let families = registry.gather();
        let sent = families
            .iter()
            .find(|family| family.get_name() == "audit_publish_sent_total")
            .unwrap();
        assert_eq!(sent.get_metric()[0].get_counter().get_value(), 1.0);
    }
}
