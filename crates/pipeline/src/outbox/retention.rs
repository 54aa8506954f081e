//! Journal retention
//!
//! The outbox keeps at most `max_files` journals. Whenever a new journal is
//! started the oldest ones beyond the limit are deleted, together with the
//! events they still hold.

use super::Outbox;
use std::io;
use std::path::Path;
use tracing::warn;

impl Outbox {
    /// Delete the oldest journals beyond `max_files`, never touching `active`
    ///
    /// Returns the number of files deleted. Must be called with the journal
    /// lock held.
    pub(super) async fn enforce_retention(&self, active: &Path) -> usize {
        let journals = match super::naming::list_journals(&self.dir).await {
            Ok(journals) => journals,
            Err(e) => {
                warn!(dir = %self.dir.display(), "Could not list journals for retention: {}", e);
                return 0;
            }
        };
        if journals.len() <= self.max_files {
            return 0;
        }

        let excess = journals.len() - self.max_files;
        let mut evicted = 0;
        for path in journals
            .iter()
            .filter(|path| path.as_path() != active)
            .take(excess)
        {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    evicted += 1;
                    warn!(
                        journal = %path.display(),
                        max_files = self.max_files,
                        "Evicted audit journal beyond retention limit, its events are dropped"
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(journal = %path.display(), "Could not evict journal: {}", e),
            }
        }

        if evicted > 0 {
            self.metrics.record_outbox_evicted(evicted as u64);
        }
        evicted
    }
}
