//! Republishing journaled events
//!
//! Replay walks the journals oldest first. A journal is claimed by renaming
//! it under the journal lock, so appends carry on into a fresh file while its
//! events are published without the lock held. Lines that fail to decode or
//! publish are merged back in front of whatever was appended meanwhile, in
//! their original order. A transient transport failure ends the pass; the
//! rest waits for the next one.

use super::naming::{claimed_path, list_claims, list_journals};
use super::{is_blank, Outbox};
use audit_relay_core::{AuditEvent, OutboxError};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of one replay pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub files_scanned: usize,
    pub events_published: usize,
    /// Lines kept because their publish failed or was not attempted
    pub events_retained: usize,
    /// Lines kept because they could not be decoded
    pub corrupt_lines: usize,
    pub files_removed: usize,
    /// The pass stopped at a transient transport failure
    pub halted: bool,
}

impl ReplayReport {
    /// Whether anything is left on disk after this pass
    pub fn is_drained(&self) -> bool {
        self.events_retained == 0 && self.corrupt_lines == 0
    }
}

#[derive(Debug, Default)]
struct FileOutcome {
    published: usize,
    retained: usize,
    corrupt: usize,
    removed: bool,
    halted: bool,
}

impl Outbox {
    /// Republish every journaled event and drop the ones that went through
    ///
    /// Passes run one at a time. The journal lock is only taken to claim a
    /// journal and to write its leftovers back, never across a publish.
    /// Errors on individual files are logged and the pass moves on.
    pub async fn replay(&self) -> ReplayReport {
        let _pass = self.replay_pass.lock().await;
        let mut report = ReplayReport::default();

        let journals = {
            let _state = self.state.lock().await;
            self.recover_claims().await;
            match list_journals(&self.dir).await {
                Ok(journals) => journals,
                Err(e) => {
                    warn!(dir = %self.dir.display(), "Could not list outbox journals: {}", e);
                    return report;
                }
            }
        };

        for path in journals {
            report.files_scanned += 1;
            match self.replay_file(&path).await {
                Ok(outcome) => {
                    report.events_published += outcome.published;
                    report.events_retained += outcome.retained;
                    report.corrupt_lines += outcome.corrupt;
                    report.files_removed += usize::from(outcome.removed);
                    if outcome.halted {
                        report.halted = true;
                        break;
                    }
                }
                Err(e) => warn!(journal = %path.display(), "Replay of journal failed: {}", e),
            }
        }

        if report.files_scanned > 0 {
            info!(
                files = report.files_scanned,
                published = report.events_published,
                retained = report.events_retained,
                corrupt = report.corrupt_lines,
                removed = report.files_removed,
                halted = report.halted,
                "Audit outbox replay finished"
            );
        }
        report
    }

    async fn replay_file(&self, path: &Path) -> Result<FileOutcome, OutboxError> {
        let claimed = claimed_path(path);
        {
            let _state = self.state.lock().await;
            match tokio::fs::rename(path, &claimed).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(FileOutcome::default()),
                Err(e) => return Err(OutboxError::io(path, "claim journal", e)),
            }
        }

        let (outcome, kept) = match tokio::fs::read(&claimed).await {
            Ok(bytes) => self.publish_lines(path, &bytes).await,
            Err(e) => {
                // hand the journal back untouched
                let _state = self.state.lock().await;
                self.merge_back(path, &claimed, None).await?;
                return Err(OutboxError::io(&claimed, "read journal", e));
            }
        };

        if outcome.retained > 0 {
            warn!(
                journal = %path.display(),
                retained = outcome.retained,
                "Some journaled events could not be republished"
            );
        }

        let _state = self.state.lock().await;
        let leftovers = (outcome.published > 0 || kept.is_empty()).then_some(kept);
        let removed = self.merge_back(path, &claimed, leftovers).await?;
        Ok(FileOutcome { removed, ..outcome })
    }

    /// Publish every line of a claimed journal, returning the lines to keep
    async fn publish_lines(&self, path: &Path, bytes: &[u8]) -> (FileOutcome, Vec<Vec<u8>>) {
        let mut outcome = FileOutcome::default();
        let mut kept: Vec<Vec<u8>> = Vec::new();
        let mut lines = bytes.split(|b| *b == b'\n').enumerate();

        while let Some((index, line)) = lines.next() {
            if is_blank(line) {
                continue;
            }

            let event: AuditEvent = match serde_json::from_slice(line) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        journal = %path.display(),
                        line = index + 1,
                        "Keeping undecodable journal line: {}",
                        e
                    );
                    self.metrics.record_outbox_corrupt_line();
                    outcome.corrupt += 1;
                    kept.push(line.to_vec());
                    continue;
                }
            };

            match self.publisher.publish(&event).await {
                Ok(()) => {
                    self.metrics.record_outbox_replayed();
                    outcome.published += 1;
                }
                Err(e) => {
                    debug!(
                        event_id = event.event_id(),
                        "Replay publish failed, keeping event: {}",
                        e
                    );
                    outcome.retained += 1;
                    kept.push(line.to_vec());

                    if e.is_transient() {
                        for (_, rest) in lines.by_ref().filter(|(_, rest)| !is_blank(rest)) {
                            outcome.retained += 1;
                            kept.push(rest.to_vec());
                        }
                        outcome.halted = true;
                        info!(
                            journal = %path.display(),
                            "Transport unavailable, deferring the rest of the outbox: {}",
                            e
                        );
                    }
                }
            }
        }
        (outcome, kept)
    }

    /// Return a claimed journal to `journal`, ahead of anything appended to
    /// `journal` since the claim
    ///
    /// `kept` of `None` means nothing was published and the claimed file goes
    /// back as it is. Returns whether the claimed journal ended up empty and
    /// was removed. Must be called with the journal lock held.
    async fn merge_back(
        &self,
        journal: &Path,
        claimed: &Path,
        kept: Option<Vec<Vec<u8>>>,
    ) -> Result<bool, OutboxError> {
        if kept.as_ref().is_some_and(Vec::is_empty) {
            remove_if_present(claimed).await?;
            return Ok(true);
        }

        let appended = match tokio::fs::read(journal).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(OutboxError::io(journal, "read journal", e)),
        };

        let mut lines = match (kept, appended.is_some()) {
            (None, false) => {
                tokio::fs::rename(claimed, journal)
                    .await
                    .map_err(|e| OutboxError::io(claimed, "restore journal", e))?;
                return Ok(false);
            }
            (Some(kept), _) => kept,
            (None, true) => read_lines(claimed).await?,
        };
        if let Some(appended) = appended {
            lines.extend(
                appended
                    .split(|b| *b == b'\n')
                    .filter(|line| !is_blank(line))
                    .map(<[u8]>::to_vec),
            );
        }

        if lines.is_empty() {
            remove_if_present(journal).await?;
        } else {
            rewrite(journal.to_path_buf(), lines).await?;
        }
        remove_if_present(claimed).await?;
        Ok(false)
    }

    /// Put back journals a crashed replay pass still had claimed
    ///
    /// Must be called with the journal lock held.
    async fn recover_claims(&self) {
        let claims = match list_claims(&self.dir).await {
            Ok(claims) => claims,
            Err(e) => {
                warn!(dir = %self.dir.display(), "Could not list claimed journals: {}", e);
                return;
            }
        };

        for (claimed, journal) in claims {
            warn!(
                journal = %journal.display(),
                "Recovering journal left claimed by an earlier replay"
            );
            if let Err(e) = self.merge_back(&journal, &claimed, None).await {
                warn!(journal = %journal.display(), "Could not recover claimed journal: {}", e);
            }
        }
    }
}

async fn read_lines(path: &Path) -> Result<Vec<Vec<u8>>, OutboxError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| OutboxError::io(path, "read journal", e))?;
    Ok(bytes
        .split(|b| *b == b'\n')
        .filter(|line| !is_blank(line))
        .map(<[u8]>::to_vec)
        .collect())
}

async fn remove_if_present(path: &Path) -> Result<(), OutboxError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(OutboxError::io(path, "remove journal", e)),
    }
}

/// Replace the journal with exactly `lines`
async fn rewrite(path: PathBuf, lines: Vec<Vec<u8>>) -> Result<(), OutboxError> {
    let target = path.clone();
    tokio::task::spawn_blocking(move || audit_relay_utils::write_lines_atomic(&target, &lines))
        .await
        .map_err(|e| OutboxError::Task {
            message: e.to_string(),
        })?
        .map_err(|e| OutboxError::io(&path, "rewrite journal", e))
}
