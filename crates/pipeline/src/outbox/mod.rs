//! Durable on-disk outbox for events the transport did not take
//!
//! The outbox is a directory of newline-delimited JSON journals. Events are
//! appended when a publish fails or the dispatch queue is full, and a
//! periodic [`replay`](Outbox::replay) republishes them once the transport
//! recovers. A single async mutex serialises every change to the journal
//! files; replay takes it only around claiming and writing back a journal, so
//! appends never wait on the transport. An advisory lock file keeps other
//! processes out of the directory.

mod append;
pub(crate) mod naming;
mod replay;
mod retention;

pub use replay::ReplayReport;

use crate::metrics::PipelineMetrics;
use crate::publisher::Publisher;
use audit_relay_config::OutboxConfig;
use audit_relay_core::OutboxError;
use audit_relay_utils::DirectoryLock;
use chrono::NaiveDate;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Journal currently receiving appends
#[derive(Debug, Clone)]
struct ActiveJournal {
    path: PathBuf,
    day: NaiveDate,
}

#[derive(Debug, Default)]
struct JournalState {
    active: Option<ActiveJournal>,
}

/// Rotating append-only journal with replay
pub struct Outbox {
    dir: PathBuf,
    max_file_size_bytes: u64,
    max_files: usize,
    publisher: Arc<dyn Publisher>,
    metrics: PipelineMetrics,
    state: Mutex<JournalState>,
    /// One replay pass at a time
    replay_pass: Mutex<()>,
    _lock: DirectoryLock,
}

impl Outbox {
    /// Take ownership of the configured directory
    ///
    /// Fails with [`OutboxError::Locked`] when another process (or another
    /// outbox in this process) already owns it.
    pub fn open(
        config: &OutboxConfig,
        publisher: Arc<dyn Publisher>,
        metrics: PipelineMetrics,
    ) -> Result<Self, OutboxError> {
        let dir = config.dir.clone();
        let lock = DirectoryLock::try_acquire(&dir).map_err(|e| {
            if e.kind() == io::ErrorKind::WouldBlock {
                OutboxError::Locked { dir: dir.clone() }
            } else {
                OutboxError::io(&dir, "lock directory", e)
            }
        })?;

        tracing::info!(
            dir = %dir.display(),
            max_file_size_bytes = config.max_file_size_bytes,
            max_files = config.max_files,
            "Audit outbox opened"
        );

        Ok(Self {
            dir,
            max_file_size_bytes: config.max_file_size_bytes.max(1),
            max_files: config.max_files.max(1),
            publisher,
            metrics,
            state: Mutex::new(JournalState::default()),
            replay_pass: Mutex::new(()),
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Journal files currently on disk, oldest first
    pub async fn journal_files(&self) -> Result<Vec<PathBuf>, OutboxError> {
        naming::list_journals(&self.dir)
            .await
            .map_err(|e| OutboxError::io(&self.dir, "list journals", e))
    }

    /// Number of non-blank journal lines currently on disk, including those
    /// of a journal a replay pass is working through
    pub async fn pending_lines(&self) -> Result<usize, OutboxError> {
        let _guard = self.state.lock().await;
        let claims = naming::list_claims(&self.dir)
            .await
            .map_err(|e| OutboxError::io(&self.dir, "list journals", e))?;
        let journals = self.journal_files().await?;

        let mut pending = 0;
        for path in claims.into_iter().map(|(claimed, _)| claimed).chain(journals) {
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(OutboxError::io(&path, "read journal", e)),
            };
            pending += bytes
                .split(|b| *b == b'\n')
                .filter(|line| !is_blank(line))
                .count();
        }
        Ok(pending)
    }
}

/// Whether a journal line carries nothing but whitespace
pub(crate) fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("dir", &self.dir)
            .field("max_file_size_bytes", &self.max_file_size_bytes)
            .field("max_files", &self.max_files)
            .field("publisher", &self.publisher.name())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::testing::RecordingPublisher;
    use audit_relay_core::AuditEvent;

    pub(crate) fn config(dir: &Path, max_file_size_bytes: u64, max_files: usize) -> OutboxConfig {
        OutboxConfig {
            enabled: true,
            dir: dir.to_path_buf(),
            max_file_size_bytes,
            max_files,
            replay_interval_sec: 15,
        }
    }

    pub(crate) fn open(
        dir: &Path,
        max_file_size_bytes: u64,
        max_files: usize,
    ) -> (Outbox, Arc<RecordingPublisher>, PipelineMetrics) {
        let publisher = Arc::new(RecordingPublisher::new());
        let (outbox, metrics) = open_with(dir, max_file_size_bytes, max_files, publisher.clone());
        (outbox, publisher, metrics)
    }

    pub(crate) fn open_with(
        dir: &Path,
        max_file_size_bytes: u64,
        max_files: usize,
        publisher: Arc<RecordingPublisher>,
    ) -> (Outbox, PipelineMetrics) {
        let metrics = PipelineMetrics::new().unwrap();
        let outbox = Outbox::open(
            &config(dir, max_file_size_bytes, max_files),
            publisher,
            metrics.clone(),
        )
        .unwrap();
        (outbox, metrics)
    }

    /// Wait until a replay pass has claimed a journal in `dir`
    pub(crate) async fn wait_for_claim(dir: &Path) {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while naming::list_claims(dir).await.unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "no journal was claimed");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    pub(crate) fn event(path: &str) -> AuditEvent {
        AuditEvent::builder()
            .with_service("orders")
            .with_request("GET", path)
            .with_response(200, 3)
            .build()
    }
}
