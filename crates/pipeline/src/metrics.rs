//! Prometheus counters for the delivery pipeline
//!
//! Every stage records into one [`PipelineMetrics`] handle. Cloning the
//! handle is cheap and all clones update the same collectors.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Latency buckets in seconds, from sub-millisecond to the request timeout
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Pipeline metrics registered on a prometheus registry
#[derive(Clone)]
pub struct PipelineMetrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    queue_dropped: IntCounter,
    outbox_appended: IntCounter,
    outbox_failed: IntCounter,
    outbox_replayed: IntCounter,
    outbox_evicted_files: IntCounter,
    outbox_corrupt_lines: IntCounter,
    publish_attempts: IntCounter,
    publish_sent: IntCounter,
    publish_failed: IntCounter,
    publish_latency: Histogram,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queue_dropped: u64,
    pub outbox_appended: u64,
    pub outbox_failed: u64,
    pub outbox_replayed: u64,
    pub outbox_evicted_files: u64,
    pub outbox_corrupt_lines: u64,
    pub publish_attempts: u64,
    pub publish_sent: u64,
    pub publish_failed: u64,
    pub publish_latency_samples: u64,
}

impl PipelineMetrics {
    /// Create metrics on a private registry
    pub fn new() -> prometheus::Result<Self> {
        Self::register(Registry::new())
    }

    /// Create metrics and register them on `registry`
    pub fn register(registry: Registry) -> prometheus::Result<Self> {
        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let queue_dropped = counter(
            "audit_queue_dropped_total",
            "Events that found the dispatch queue full",
        )?;
        let outbox_appended = counter(
            "audit_outbox_appended_total",
            "Events written to the outbox journal",
        )?;
        let outbox_failed = counter(
            "audit_outbox_failed_total",
            "Outbox journal writes that failed",
        )?;
        let outbox_replayed = counter(
            "audit_outbox_replayed_total",
            "Journaled events republished by replay",
        )?;
        let outbox_evicted_files = counter(
            "audit_outbox_evicted_files_total",
            "Journal files deleted by the retention limit",
        )?;
        let outbox_corrupt_lines = counter(
            "audit_outbox_corrupt_lines_total",
            "Journal lines that could not be parsed during replay",
        )?;
        let publish_attempts = counter(
            "audit_publish_attempts_total",
            "Publish attempts against the transport",
        )?;
        let publish_sent = counter(
            "audit_publish_sent_total",
            "Events accepted by the transport",
        )?;
        let publish_failed = counter(
            "audit_publish_failed_total",
            "Publish attempts that failed",
        )?;

        let publish_latency = Histogram::with_opts(
            HistogramOpts::new(
                "audit_publish_latency_seconds",
                "Time spent in a publish attempt",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(publish_latency.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                queue_dropped,
                outbox_appended,
                outbox_failed,
                outbox_replayed,
                outbox_evicted_files,
                outbox_corrupt_lines,
                publish_attempts,
                publish_sent,
                publish_failed,
                publish_latency,
            }),
        })
    }

    pub fn record_queue_dropped(&self) {
        self.inner.queue_dropped.inc();
    }

    pub fn record_outbox_appended(&self) {
        self.inner.outbox_appended.inc();
    }

    pub fn record_outbox_failed(&self) {
        self.inner.outbox_failed.inc();
    }

    pub fn record_outbox_replayed(&self) {
        self.inner.outbox_replayed.inc();
    }

    pub fn record_outbox_evicted(&self, files: u64) {
        self.inner.outbox_evicted_files.inc_by(files);
    }

    pub fn record_outbox_corrupt_line(&self) {
        self.inner.outbox_corrupt_lines.inc();
    }

    pub fn record_publish_attempt(&self) {
        self.inner.publish_attempts.inc();
    }

    pub fn record_publish_success(&self, latency: Duration) {
        self.inner.publish_sent.inc();
        self.inner.publish_latency.observe(latency.as_secs_f64());
    }

    pub fn record_publish_failure(&self, latency: Duration) {
        self.inner.publish_failed.inc();
        self.inner.publish_latency.observe(latency.as_secs_f64());
    }

    /// Read every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_dropped: self.inner.queue_dropped.get(),
            outbox_appended: self.inner.outbox_appended.get(),
            outbox_failed: self.inner.outbox_failed.get(),
            outbox_replayed: self.inner.outbox_replayed.get(),
            outbox_evicted_files: self.inner.outbox_evicted_files.get(),
            outbox_corrupt_lines: self.inner.outbox_corrupt_lines.get(),
            publish_attempts: self.inner.publish_attempts.get(),
            publish_sent: self.inner.publish_sent.get(),
            publish_failed: self.inner.publish_failed.get(),
            publish_latency_samples: self.inner.publish_latency.get_sample_count(),
        }
    }

    /// Registry the collectors live on
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Render the registry in the prometheus text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.inner.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode audit metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
