//! Bounded dispatch queue drained by a pool of publish workers
//!
//! `submit` never waits for queue space: when the queue is full the event is
//! diverted to the outbox instead. Workers share one receiver and hand every
//! event whose publish fails to the outbox as well, so an event only leaves
//! the pipeline once the transport accepted it or it sits in a journal.

use crate::metrics::PipelineMetrics;
use crate::outbox::Outbox;
use crate::publisher::Publisher;
use crate::redact::RedactedEvent;
use audit_relay_config::AuditConfig;
use audit_relay_core::{AuditEvent, DispatchError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Queue and worker pool sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub queue_capacity: usize,
    pub worker_threads: usize,
}

impl DispatchSettings {
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            worker_threads: config.worker_threads,
        }
    }
}

/// What happened to the queue during shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Workers emptied the queue before the grace period ran out
    pub drained_within_grace: bool,
    /// Events still queued after the grace period and written to the outbox
    pub outboxed: usize,
    /// Events still queued after the grace period that could not be kept
    pub lost: usize,
}

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<AuditEvent>>>;

/// Bounded queue in front of the publisher
pub struct DispatchChannel {
    sender: RwLock<Option<mpsc::Sender<AuditEvent>>>,
    receiver: SharedReceiver,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stop: watch::Sender<bool>,
    outbox: Option<Arc<Outbox>>,
    metrics: PipelineMetrics,
    capacity: usize,
}

impl DispatchChannel {
    /// Allocate the queue and spawn the workers
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        settings: DispatchSettings,
        publisher: Arc<dyn Publisher>,
        outbox: Option<Arc<Outbox>>,
        metrics: PipelineMetrics,
    ) -> Self {
        let capacity = settings.queue_capacity.max(1);
        let worker_count = settings.worker_threads.max(1);

        let (sender, receiver) = mpsc::channel(capacity);
        let receiver: SharedReceiver = Arc::new(AsyncMutex::new(receiver));
        let (stop, _) = watch::channel(false);

        let workers = (0..worker_count)
            .map(|id| {
                let worker = Worker {
                    receiver: Arc::clone(&receiver),
                    publisher: Arc::clone(&publisher),
                    outbox: outbox.clone(),
                    stop: stop.subscribe(),
                };
                tokio::spawn(
                    worker
                        .run()
                        .instrument(info_span!("audit_worker", worker = id)),
                )
            })
            .collect();

        info!(
            capacity,
            workers = worker_count,
            transport = publisher.name(),
            outbox = outbox.is_some(),
            "Audit dispatch started"
        );

        Self {
            sender: RwLock::new(Some(sender)),
            receiver,
            workers: Mutex::new(workers),
            stop,
            outbox,
            metrics,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events waiting in the queue right now
    pub fn queued(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map_or(0, |sender| self.capacity - sender.capacity())
    }

    /// Hand an event to the workers without waiting for queue space
    ///
    /// A full queue diverts the event to the outbox and counts it in
    /// `audit_queue_dropped_total`. `Saturated` is returned only when the
    /// diverted event could not be persisted.
    pub async fn submit(&self, event: RedactedEvent) -> Result<(), DispatchError> {
        let offer = {
            let sender = self.sender.read();
            match sender.as_ref() {
                Some(sender) => sender.try_send(event.into_inner()),
                None => Err(TrySendError::Closed(event.into_inner())),
            }
        };

        match offer {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                self.metrics.record_queue_dropped();
                warn!(
                    event_id = event.event_id(),
                    capacity = self.capacity,
                    "Audit queue full, diverting event to the outbox"
                );
                self.persist(&event)
                    .await
                    .then_some(())
                    .ok_or(DispatchError::Saturated {
                        capacity: self.capacity,
                    })
            }
            Err(TrySendError::Closed(event)) => {
                debug!(
                    event_id = event.event_id(),
                    "Audit dispatch closed, writing event to the outbox"
                );
                self.persist(&event)
                    .await
                    .then_some(())
                    .ok_or(DispatchError::Closed)
            }
        }
    }

    /// Write to the outbox, reporting whether the event is now durable
    async fn persist(&self, event: &AuditEvent) -> bool {
        let Some(outbox) = &self.outbox else {
            return false;
        };
        match outbox.try_append(event).await {
            Ok(_) => true,
            Err(e) => {
                error!(
                    event_id = event.event_id(),
                    "Audit event could not be written to the outbox: {}",
                    e
                );
                false
            }
        }
    }

    /// Stop accepting events and drain the queue
    ///
    /// Workers get `grace` to empty the queue. After that they finish the
    /// publish in hand and exit, and whatever is still queued goes to the
    /// outbox. Later calls return an empty report.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let Some(sender) = self.sender.write().take() else {
            return ShutdownReport {
                drained_within_grace: true,
                ..ShutdownReport::default()
            };
        };
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock());
        let joined = futures::future::join_all(workers);
        tokio::pin!(joined);

        let drained_within_grace = match tokio::time::timeout(grace, &mut joined).await {
            Ok(results) => {
                log_worker_panics(results);
                true
            }
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Audit queue not drained within grace period, stopping workers"
                );
                // send fails only when every worker is already gone
                let _ = self.stop.send(true);
                log_worker_panics(joined.await);
                false
            }
        };

        let mut report = ShutdownReport {
            drained_within_grace,
            ..ShutdownReport::default()
        };
        let mut receiver = self.receiver.lock().await;
        while let Ok(event) = receiver.try_recv() {
            if self.persist(&event).await {
                report.outboxed += 1;
            } else {
                report.lost += 1;
                error!(
                    event_id = event.event_id(),
                    "Audit event lost during shutdown"
                );
            }
        }

        info!(
            drained = report.drained_within_grace,
            outboxed = report.outboxed,
            lost = report.lost,
            "Audit dispatch stopped"
        );
        report
    }
}

fn log_worker_panics(results: Vec<Result<(), tokio::task::JoinError>>) {
    for result in results {
        if let Err(e) = result {
            error!("Audit worker terminated abnormally: {}", e);
        }
    }
}

impl std::fmt::Debug for DispatchChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchChannel")
            .field("capacity", &self.capacity)
            .field("queued", &self.queued())
            .field("outbox", &self.outbox.is_some())
            .finish()
    }
}

struct Worker {
    receiver: SharedReceiver,
    publisher: Arc<dyn Publisher>,
    outbox: Option<Arc<Outbox>>,
    stop: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        debug!("Audit worker started");
        let mut stop_closed = false;

        loop {
            let event = {
                let mut receiver = self.receiver.lock().await;
                if *self.stop.borrow() {
                    break;
                }
                tokio::select! {
                    biased;
                    changed = self.stop.changed(), if !stop_closed => {
                        match changed {
                            Ok(()) if *self.stop.borrow() => break,
                            Ok(()) => continue,
                            Err(_) => {
                                stop_closed = true;
                                continue;
                            }
                        }
                    }
                    event = receiver.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                }
            };

            self.deliver(event).await;
        }
        debug!("Audit worker stopped");
    }

    async fn deliver(&self, event: AuditEvent) {
        match self.publisher.publish(&event).await {
            Ok(()) => {}
            Err(e) => match &self.outbox {
                Some(outbox) => {
                    warn!(
                        event_id = event.event_id(),
                        "Publish failed, writing event to the outbox: {}",
                        e
                    );
                    outbox.append(&event).await;
                }
                None => error!(
                    event_id = event.event_id(),
                    "Publish failed and no outbox is configured, event lost: {}",
                    e
                ),
            },
        }
    }
}
