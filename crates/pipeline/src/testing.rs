//! In-memory publisher for tests and local wiring
//!
//! [`RecordingPublisher`] keeps every event it accepted, can be switched into
//! a failing mode (an outage, or rejection of chosen events), and can hold publishes
//! behind a gate so tests can fill the dispatch queue deterministically.

use crate::publisher::Publisher;
use async_trait::async_trait;
use audit_relay_core::{AuditEvent, TransportError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Semaphore;

#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<AuditEvent>>,
    failing: AtomicBool,
    failing_ids: Mutex<HashSet<String>>,
    attempts: AtomicUsize,
    gate: Option<Semaphore>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publisher whose publishes wait until [`release`](Self::release) hands
    /// out permits, one per publish
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// Let `permits` more publishes through the gate
    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    /// Open the gate for good
    pub fn open_gate(&self) {
        self.release(Semaphore::MAX_PERMITS / 2);
    }

    /// Fail every publish as if the transport were down
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Reject every publish of this particular event, as a transport does
    /// with a payload it will never accept
    pub fn fail_for(&self, event: &AuditEvent) {
        self.failing_ids.lock().insert(event.event_id().to_string());
    }

    /// Events accepted so far, in acceptance order
    pub fn published(&self) -> Vec<AuditEvent> {
        self.published.lock().clone()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().len()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, event: &AuditEvent) -> Result<(), TransportError> {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::unavailable("recording", "publisher set to fail"));
        }
        if self.failing_ids.lock().contains(event.event_id()) {
            return Err(TransportError::Rejected {
                destination: "recording".to_string(),
                status: 422,
                body: "event rejected".to_string(),
            });
        }

        self.published.lock().push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
