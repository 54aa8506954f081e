//! Journal file names
//!
//! `audit-YYYY-MM-DD.jsonl` opens a UTC day, rotations within the day are
//! `audit-YYYY-MM-DD_HHMMSSmmm.jsonl` with an optional `_NNN` suffix. Because
//! `.` sorts before `_`, sorting names lexicographically yields the order the
//! files were started in.

use chrono::{DateTime, NaiveDate, Utc};
use std::io;
use std::path::{Path, PathBuf};

pub(crate) const JOURNAL_PREFIX: &str = "audit-";
pub(crate) const JOURNAL_EXTENSION: &str = ".jsonl";
/// Appended to a journal while a replay pass owns it
pub(crate) const CLAIM_SUFFIX: &str = ".replaying";

const DAY_FORMAT: &str = "%Y-%m-%d";
const ROTATION_FORMAT: &str = "%Y-%m-%d_%H%M%S%3f";

/// Length of `audit-YYYY-MM-DD`
const DAY_STEM_LEN: usize = 16;
/// Length of `audit-YYYY-MM-DD_HHMMSSmmm`
const ROTATION_STEM_LEN: usize = 26;

/// Name of the first journal of `day`
pub(crate) fn daily_name(day: NaiveDate) -> String {
    format!(
        "{JOURNAL_PREFIX}{}{JOURNAL_EXTENSION}",
        day.format(DAY_FORMAT)
    )
}

/// Whether `name` is a journal this outbox wrote
pub(crate) fn is_journal(name: &str) -> bool {
    name.starts_with(JOURNAL_PREFIX)
        && name.ends_with(JOURNAL_EXTENSION)
        && journal_day(name).is_some()
}

/// UTC day a journal was started on
pub(crate) fn journal_day(name: &str) -> Option<NaiveDate> {
    let stamp = name.get(JOURNAL_PREFIX.len()..DAY_STEM_LEN)?;
    NaiveDate::parse_from_str(stamp, DAY_FORMAT).ok()
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

/// Path for the journal that follows `active`
///
/// The result always sorts after `active` and never names an existing file,
/// even when the clock stepped backwards or several rotations land in the
/// same millisecond.
pub(crate) fn next_rotation(dir: &Path, now: DateTime<Utc>, active: Option<&Path>) -> PathBuf {
    let active_name = active.and_then(file_name);
    let fresh = format!("{JOURNAL_PREFIX}{}", now.format(ROTATION_FORMAT));

    let base = match active_name {
        Some(active) if format!("{fresh}{JOURNAL_EXTENSION}").as_str() <= active => {
            let stem = active.trim_end_matches(JOURNAL_EXTENSION);
            stem.get(..ROTATION_STEM_LEN).unwrap_or(stem).to_string()
        }
        _ => fresh,
    };

    let mut candidate = format!("{base}{JOURNAL_EXTENSION}");
    let mut sequence = 0u32;
    loop {
        let sorts_after = active_name.map_or(true, |active| candidate.as_str() > active);
        if sorts_after && !dir.join(&candidate).exists() {
            return dir.join(candidate);
        }
        sequence += 1;
        candidate = format!("{base}_{sequence:03}{JOURNAL_EXTENSION}");
    }
}

/// All journal files in `dir`, oldest first
pub(crate) async fn list_journals(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut journals = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if file_name(&path).is_some_and(is_journal) && entry.file_type().await?.is_file() {
            journals.push(path);
        }
    }
    journals.sort_by(|a, b| file_name(a).cmp(&file_name(b)));
    Ok(journals)
}

/// Name a journal carries while it is being replayed
pub(crate) fn claimed_path(journal: &Path) -> PathBuf {
    let mut name = journal.as_os_str().to_os_string();
    name.push(CLAIM_SUFFIX);
    PathBuf::from(name)
}

/// Journals left claimed by a replay that never finished, paired with the
/// journal path each one came from, oldest first
pub(crate) async fn list_claims(dir: &Path) -> io::Result<Vec<(PathBuf, PathBuf)>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut claims = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(journal) = file_name(&path)
            .and_then(|name| name.strip_suffix(CLAIM_SUFFIX))
            .filter(|journal| is_journal(journal))
            .map(|journal| dir.join(journal))
        else {
            continue;
        };
        if entry.file_type().await?.is_file() {
            claims.push((path, journal));
        }
    }
    claims.sort_by(|a, b| file_name(&a.1).cmp(&file_name(&b.1)));
    Ok(claims)
}

/// Newest journal started on `day`, if any
pub(crate) async fn latest_journal_for(dir: &Path, day: NaiveDate) -> io::Result<Option<PathBuf>> {
    let journals = list_journals(dir).await?;
    Ok(journals
        .into_iter()
        .rev()
        .find(|path| file_name(path).and_then(journal_day) == Some(day)))
}
