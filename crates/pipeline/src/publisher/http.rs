//! HTTP bridge to a message broker's REST ingress

use super::Publisher;
use async_trait::async_trait;
use audit_relay_config::TransportConfig;
use audit_relay_core::{AuditEvent, TransportError};
use chrono::Utc;
use std::time::Duration;
use tracing::debug;

const HEADER_SERVICE: &str = "x-audit-service";
const HEADER_METHOD: &str = "x-audit-method";
const HEADER_STATUS: &str = "x-audit-status";
const HEADER_PRIORITY: &str = "x-audit-priority";
const HEADER_DELIVERY_MODE: &str = "x-audit-delivery-mode";
const HEADER_TIMESTAMP: &str = "x-audit-timestamp";
const HEADER_EXPIRATION: &str = "x-audit-expiration";

/// Longest response body kept in a rejection error
const MAX_ERROR_BODY: usize = 512;

/// Publisher that POSTs each event as JSON to `{endpoint}/{destination}`
///
/// Routing metadata and delivery attributes travel as `x-audit-*` headers so
/// the broker can filter without parsing the payload.
pub struct HttpPublisher {
    client: reqwest::Client,
    url: String,
    destination: String,
    priority: u8,
    time_to_live_ms: u64,
    delivery_mode: &'static str,
    timeout: Duration,
}

impl HttpPublisher {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let timeout = config.request_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unavailable {
                destination: config.destination.clone(),
                message: "failed to build HTTP client".to_string(),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            url: format!(
                "{}/{}",
                config.endpoint.trim_end_matches('/'),
                config.destination.trim_start_matches('/')
            ),
            destination: config.destination.clone(),
            priority: config.priority,
            time_to_live_ms: config.time_to_live_ms,
            delivery_mode: config.delivery_mode.as_str(),
            timeout,
        })
    }

    /// Target URL events are posted to
    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_send_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                destination: self.destination.clone(),
                duration: self.timeout,
            }
        } else {
            TransportError::Unavailable {
                destination: self.destination.clone(),
                message: e.to_string(),
                source: Some(Box::new(e)),
            }
        }
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, event: &AuditEvent) -> Result<(), TransportError> {
        let body = serde_json::to_vec(event)
            .map_err(|source| TransportError::Serialization { source })?;

        let sent_at = Utc::now().timestamp_millis();
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(HEADER_SERVICE, event.service())
            .header(HEADER_METHOD, event.method())
            .header(HEADER_STATUS, event.status().to_string())
            .header(HEADER_PRIORITY, self.priority.to_string())
            .header(HEADER_DELIVERY_MODE, self.delivery_mode)
            .header(HEADER_TIMESTAMP, sent_at.to_string());
        if self.time_to_live_ms > 0 {
            let ttl = i64::try_from(self.time_to_live_ms).unwrap_or(i64::MAX);
            request = request.header(HEADER_EXPIRATION, sent_at.saturating_add(ttl).to_string());
        }

        debug!(
            event_id = event.event_id(),
            url = %self.url,
            "Publishing audit event"
        );

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status.is_success() {
            debug!(event_id = event.event_id(), status = status.as_u16(), "Audit event accepted");
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        Err(TransportError::Rejected {
            destination: self.destination.clone(),
            status: status.as_u16(),
            body,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(endpoint: &str, time_to_live_ms: u64) -> TransportConfig {
        TransportConfig {
            endpoint: format!("{endpoint}/api/audit/"),
            destination: "jms.queue.audit".to_string(),
            time_to_live_ms,
            request_timeout_ms: 2000,
            ..TransportConfig::default()
        }
    }

    fn event() -> AuditEvent {
        AuditEvent::builder()
            .with_service("orders")
            .with_request("POST", "/orders")
            .with_response(201, 8)
            .build()
    }

    #[tokio::test]
    async fn test_publish_posts_event_with_routing_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/audit/jms.queue.audit"))
            .and(header("x-audit-service", "orders"))
            .and(header("x-audit-method", "POST"))
            .and(header("x-audit-status", "201"))
            .and(header("x-audit-priority", "4"))
            .and(header("x-audit-delivery-mode", "PERSISTENT"))
            .and(header_exists("x-audit-timestamp"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let publisher = HttpPublisher::new(&transport(&server.uri(), 0)).unwrap();
        let event = event();
        publisher.publish(&event).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key(HEADER_EXPIRATION));
        let sent: AuditEvent = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent, event);
    }

    #[tokio::test]
    async fn test_expiration_header_only_with_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists("x-audit-expiration"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let publisher = HttpPublisher::new(&transport(&server.uri(), 60_000)).unwrap();
        publisher.publish(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("broker paging"))
            .mount(&server)
            .await;

        let publisher = HttpPublisher::new(&transport(&server.uri(), 0)).unwrap();
        let err = publisher.publish(&event()).await.unwrap_err();

        match &err {
            TransportError::Rejected { status, body, .. } => {
                assert_eq!(*status, 503);
                assert_eq!(body, "broker paging");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_slow_broker_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let config = TransportConfig {
            request_timeout_ms: 100,
            ..transport(&server.uri(), 0)
        };
        let publisher = HttpPublisher::new(&config).unwrap();
        let err = publisher.publish(&event()).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let publisher = HttpPublisher::new(&transport(&format!("http://{addr}"), 0)).unwrap();
        let err = publisher.publish(&event()).await.unwrap_err();
        assert!(matches!(err, TransportError::Unavailable { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_url_joins_endpoint_and_destination() {
        let publisher = HttpPublisher::new(&transport("http://broker:8161", 0)).unwrap();
        assert_eq!(
            publisher.url(),
            "http://broker:8161/api/audit/jms.queue.audit"
        );
        assert_eq!(publisher.name(), "http");
    }
}
