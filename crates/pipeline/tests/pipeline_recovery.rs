//! End-to-end delivery: outage, journaling, recovery and replay

use audit_relay_config::{AuditConfig, FailurePolicy, TransportConfig};
use audit_relay_core::{AuditError, AuditEvent, DispatchError, REDACTION_MARKER};
use audit_relay_pipeline::testing::RecordingPublisher;
use audit_relay_pipeline::AuditPipeline;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_logging() {
    // only the first test to get here installs the subscriber
    let _ = audit_relay_utils::init_tracing("audit_relay_pipeline=debug");
}

fn base_config(dir: &TempDir) -> AuditConfig {
    init_logging();
    let mut config = AuditConfig::builder()
        .with_service("orders", "it")
        .with_queue_capacity(32)
        .with_worker_threads(2)
        .with_shutdown_grace_ms(2000)
        .with_outbox_dir(dir.path())
        .build();
    // replay is driven by the tests
    config.outbox.replay_interval_sec = 3600;
    config
}

fn captured(path: &str) -> AuditEvent {
    AuditEvent::builder()
        .with_service("orders")
        .with_env("it")
        .with_request("POST", path)
        .with_response(201, 4)
        .with_header("Authorization", "Bearer secret123")
        .with_header("X-Correlation-Id", "corr-1")
        .with_identity_from_headers(Some("10.0.0.8"))
        .build()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_outage_is_journaled_and_replayed_after_recovery() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut config = base_config(&temp_dir);
    config.transport = TransportConfig {
        endpoint: server.uri(),
        destination: "audit".to_string(),
        request_timeout_ms: 2000,
        ..TransportConfig::default()
    };
    let pipeline = AuditPipeline::from_config(&config).unwrap();

    for i in 0..3 {
        pipeline.record(captured(&format!("/orders/{i}"))).await.unwrap();
    }
    let metrics = pipeline.metrics().clone();
    wait_until(|| metrics.snapshot().outbox_appended == 3).await;

    let outbox = pipeline.outbox().unwrap().clone();
    assert_eq!(outbox.pending_lines().await.unwrap(), 3);
    assert_eq!(metrics.snapshot().publish_failed, 3);

    // broker comes back
    server.reset().await;
    Mock::given(method("POST"))
        .and(path("/audit"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let report = pipeline.replay_now().await.unwrap();
    assert_eq!(report.events_published, 3);
    assert!(report.is_drained());
    assert_eq!(outbox.pending_lines().await.unwrap(), 0);

    let requests = server.received_requests().await.unwrap();
    for request in &requests {
        let event: AuditEvent = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(event.header("authorization"), Some(REDACTION_MARKER));
        assert_eq!(event.correlation_id(), "corr-1");
        assert_eq!(event.client_ip(), "10.0.0.8");
    }

    drop(outbox);
    let shutdown = pipeline.shutdown().await;
    assert_eq!(shutdown.lost, 0);
    assert_eq!(metrics.snapshot().outbox_replayed, 3);
}

#[tokio::test]
async fn test_journal_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let config = base_config(&temp_dir);

    let down = Arc::new(RecordingPublisher::new());
    down.set_failing(true);
    let first = AuditPipeline::start(&config, down.clone()).unwrap();
    let events: Vec<_> = (0..5).map(|i| captured(&format!("/restart/{i}"))).collect();
    for event in &events {
        first.record(event.clone()).await.unwrap();
    }
    let metrics = first.metrics().clone();
    wait_until(|| metrics.snapshot().outbox_appended == 5).await;
    first.shutdown().await;

    let up = Arc::new(RecordingPublisher::new());
    let second = AuditPipeline::start(&config, up.clone()).unwrap();
    let report = second.replay_now().await.unwrap();
    second.shutdown().await;

    assert_eq!(report.events_published, 5);
    let mut replayed: Vec<_> = up
        .published()
        .iter()
        .map(|event| event.event_id().to_string())
        .collect();
    let mut expected: Vec<_> = events
        .iter()
        .map(|event| event.event_id().to_string())
        .collect();
    replayed.sort();
    expected.sort();
    assert_eq!(replayed, expected);
}

#[tokio::test]
async fn test_fail_closed_reports_saturation_without_outbox() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = base_config(&temp_dir);
    config.outbox.enabled = false;
    config.queue_capacity = 1;
    config.worker_threads = 1;
    config.failure_policy = FailurePolicy::FailClosed;

    let publisher = Arc::new(RecordingPublisher::gated());
    let pipeline = AuditPipeline::start(&config, publisher.clone()).unwrap();

    let mut refused = 0;
    for i in 0..4 {
        match pipeline.record(captured(&format!("/closed/{i}"))).await {
            Ok(()) => {}
            Err(AuditError::Pipeline(DispatchError::Saturated { .. })) => refused += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(refused >= 1);
    assert_eq!(pipeline.metrics().snapshot().queue_dropped, refused);

    publisher.open_gate();
    let report = pipeline.shutdown().await;
    assert_eq!(report.lost, 0);
    assert_eq!(publisher.published_count() as u64 + refused, 4);
}

#[tokio::test]
async fn test_fail_open_swallows_saturation() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = base_config(&temp_dir);
    config.outbox.enabled = false;
    config.queue_capacity = 1;
    config.worker_threads = 1;
    config.failure_policy = FailurePolicy::FailOpen;

    let publisher = Arc::new(RecordingPublisher::gated());
    let pipeline = AuditPipeline::start(&config, publisher.clone()).unwrap();

    for i in 0..4 {
        pipeline
            .record(captured(&format!("/open/{i}")))
            .await
            .unwrap();
    }
    assert!(pipeline.metrics().snapshot().queue_dropped >= 1);

    publisher.open_gate();
    pipeline.shutdown().await;
}
