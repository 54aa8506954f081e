//! Transport that writes each event to the log

use super::Publisher;
use async_trait::async_trait;
use audit_relay_core::{AuditEvent, TransportError};
use tracing::{info, warn};

/// Publisher that writes every event to the log as a JSON payload
///
/// Useful for local development and as a sink when no broker is deployed.
/// It never reports a failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

impl LogPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, event: &AuditEvent) -> Result<(), TransportError> {
        match serde_json::to_string(event) {
            Ok(payload) => info!(
                target: "audit",
                event_id = event.event_id(),
                correlation_id = event.correlation_id(),
                "{}",
                payload
            ),
            Err(e) => warn!(
                target: "audit",
                event_id = event.event_id(),
                "Audit event could not be encoded, logging debug form ({}): {:?}",
                e,
                event
            ),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
