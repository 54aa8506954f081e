//! Periodic outbox replay

use crate::outbox::Outbox;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info_span, Instrument};

/// Background task calling [`Outbox::replay`] on a fixed interval
///
/// The first replay runs one interval after spawning. A replay that is in
/// progress when shutdown is requested runs to completion.
pub struct ReplayScheduler {
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ReplayScheduler {
    /// Must be called from within a Tokio runtime
    pub fn spawn(outbox: Arc<Outbox>, every: Duration) -> Self {
        let every = every.max(Duration::from_millis(1));
        let (stop, mut stopped) = watch::channel(false);

        let task = async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(interval_ms = every.as_millis() as u64, "Audit replay scheduled");

            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        let report = outbox.replay().await;
                        debug!(
                            published = report.events_published,
                            retained = report.events_retained,
                            "Scheduled audit replay ran"
                        );
                    }
                }
            }
            debug!("Audit replay stopped");
        };

        Self {
            stop,
            handle: Some(tokio::spawn(task.instrument(info_span!("audit_replay")))),
        }
    }

    /// Stop scheduling, waiting for a replay in progress
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Audit replay task terminated abnormally: {}", e);
            }
        }
    }
}

impl Drop for ReplayScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::test_support::{event, open};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_scheduler_replays_periodically() {
        let temp_dir = TempDir::new().unwrap();
        let (outbox, publisher, _metrics) = open(temp_dir.path(), 1024 * 1024, 10);
        let outbox = Arc::new(outbox);
        outbox.try_append(&event("/queued")).await.unwrap();

        let scheduler = ReplayScheduler::spawn(Arc::clone(&outbox), Duration::from_millis(50));

        let deadline = Instant::now() + Duration::from_secs(5);
        while publisher.published_count() == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.shutdown().await;

        assert_eq!(publisher.published_count(), 1);
        assert_eq!(outbox.pending_lines().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick_skips_replay() {
        let temp_dir = TempDir::new().unwrap();
        let (outbox, publisher, _metrics) = open(temp_dir.path(), 1024 * 1024, 10);
        let outbox = Arc::new(outbox);
        outbox.try_append(&event("/queued")).await.unwrap();

        let scheduler = ReplayScheduler::spawn(Arc::clone(&outbox), Duration::from_secs(3600));
        scheduler.shutdown().await;

        assert_eq!(publisher.published_count(), 0);
        assert_eq!(outbox.pending_lines().await.unwrap(), 1);
    }
}
