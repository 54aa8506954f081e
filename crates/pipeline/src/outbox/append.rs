//! Appending events to the active journal

use super::naming::{daily_name, latest_journal_for, next_rotation};
use super::{ActiveJournal, JournalState, Outbox};
use audit_relay_core::{AuditEvent, OutboxError};
use chrono::{DateTime, Utc};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, error, info};

impl Outbox {
    /// Journal `event`, logging and counting any failure
    ///
    /// The event is lost only if the journal write itself fails.
    pub async fn append(&self, event: &AuditEvent) {
        if let Err(e) = self.try_append(event).await {
            error!(
                event_id = event.event_id(),
                dir = %self.dir.display(),
                "Audit event could not be written to the outbox: {}",
                e
            );
        }
    }

    /// Journal `event` and return the file it landed in
    ///
    /// Failures are counted in `audit_outbox_failed_total` before they are
    /// returned.
    pub async fn try_append(&self, event: &AuditEvent) -> Result<PathBuf, OutboxError> {
        let result = self.append_line(event).await;
        match &result {
            Ok(path) => {
                self.metrics.record_outbox_appended();
                debug!(
                    event_id = event.event_id(),
                    journal = %path.display(),
                    "Audit event journaled"
                );
            }
            Err(_) => self.metrics.record_outbox_failed(),
        }
        result
    }

    async fn append_line(&self, event: &AuditEvent) -> Result<PathBuf, OutboxError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut state = self.state.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| OutboxError::io(&self.dir, "create directory", e))?;

        let now = Utc::now();
        let (mut path, mut started_new) = self.current_journal(&mut state, now).await?;

        let size = file_size(&path).await?;
        if size > 0 && size + line.len() as u64 > self.max_file_size_bytes {
            let rotated = next_rotation(&self.dir, now, Some(&path));
            info!(
                from = %path.display(),
                to = %rotated.display(),
                size,
                "Rotating audit outbox journal"
            );
            path = rotated;
            started_new = true;
            state.active = Some(ActiveJournal {
                path: path.clone(),
                day: now.date_naive(),
            });
        }

        if let Err(e) = write_line(&path, &line).await {
            // part of the line may have reached the file; the next append
            // resumes the journal and terminates it first
            state.active = None;
            return Err(e);
        }

        if started_new {
            self.enforce_retention(&path).await;
        }
        Ok(path)
    }

    /// Journal for appends at `now`, and whether it is a file not yet on disk
    ///
    /// The first append of a day (or after a restart) resumes the newest
    /// journal of that day so restarts do not multiply files.
    async fn current_journal(
        &self,
        state: &mut JournalState,
        now: DateTime<Utc>,
    ) -> Result<(PathBuf, bool), OutboxError> {
        let today = now.date_naive();
        if let Some(active) = state.active.as_ref().filter(|active| active.day == today) {
            let missing = !tokio::fs::try_exists(&active.path).await.unwrap_or(false);
            return Ok((active.path.clone(), missing));
        }

        let resumed = latest_journal_for(&self.dir, today)
            .await
            .map_err(|e| OutboxError::io(&self.dir, "list journals", e))?;
        let (path, started_new) = match resumed {
            Some(path) => {
                repair_torn_tail(&path).await?;
                (path, false)
            }
            None => (self.dir.join(daily_name(today)), true),
        };

        state.active = Some(ActiveJournal {
            path: path.clone(),
            day: today,
        });
        Ok((path, started_new))
    }
}

async fn write_line(path: &Path, line: &[u8]) -> Result<(), OutboxError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| OutboxError::io(path, "open journal", e))?;
    file.write_all(line)
        .await
        .map_err(|e| OutboxError::io(path, "append", e))?;
    file.flush()
        .await
        .map_err(|e| OutboxError::io(path, "flush", e))
}

async fn file_size(path: &Path) -> Result<u64, OutboxError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(OutboxError::io(path, "stat journal", e)),
    }
}

/// Terminate a partial last line so the next record starts on its own line
async fn repair_torn_tail(path: &Path) -> Result<(), OutboxError> {
    let mut file = match OpenOptions::new().read(true).append(true).open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(OutboxError::io(path, "open journal", e)),
    };

    let len = file
        .metadata()
        .await
        .map_err(|e| OutboxError::io(path, "stat journal", e))?
        .len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))
        .await
        .map_err(|e| OutboxError::io(path, "seek journal", e))?;
    file.read_exact(&mut last)
        .await
        .map_err(|e| OutboxError::io(path, "read journal", e))?;

    if last[0] != b'\n' {
        tracing::warn!(
            journal = %path.display(),
            "Journal ends in a partial line, terminating it"
        );
        file.write_all(b"\n")
            .await
            .map_err(|e| OutboxError::io(path, "repair journal", e))?;
        file.flush()
            .await
            .map_err(|e| OutboxError::io(path, "flush", e))?;
    }
    Ok(())
}
