//! Durable per-session storage of summaries and compaction progress.
//!
//! [`SummaryStore`] is the only persistence seam the scheduler and builder
//! see, so a host can back it with files, an embedded KV store, or a table.
//! Two implementations ship with the crate:
//!
//! - [`FileSummaryStore`] — one directory per session:
//!
//!   ```text
//!   root/
//!     <session_id>/
//!       progress.json
//!       summary-1718000000000.json
//!       summary-1718000420000.json
//!   ```
//!
//!   Every write goes to a temp file first and is renamed into place, so a
//!   crash never leaves a half-written progress record behind.
//!
//! - [`InMemorySummaryStore`] — a mutex-guarded map, for hosts that persist
//!   elsewhere and for tests.

use crate::StoreError;
use crate::summary::{Summary, SummaryProgress};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Persistence interface for summaries and progress, keyed by session id.
///
/// Calls are synchronous and scoped to a single session.
pub trait SummaryStore: Send + Sync {
    /// Current progress. Returns the zeroed default when nothing is stored
    /// or the record cannot be read; never fails.
    fn get_progress(&self, session_id: &str) -> SummaryProgress;

    /// Replace the progress record atomically.
    fn set_progress(&self, session_id: &str, progress: &SummaryProgress) -> Result<(), StoreError>;

    /// Persist a new, immutable summary.
    fn append_summary(&self, session_id: &str, summary: &Summary) -> Result<(), StoreError>;

    /// All summaries of a session, oldest first.
    fn list_summaries(&self, session_id: &str) -> Result<Vec<Summary>, StoreError>;

    /// Remove every summary and the progress record.
    ///
    /// Best-effort: a failure on one item does not stop the others. Returns
    /// [`StoreError::PartialDelete`] if anything was left behind.
    fn delete_all(&self, session_id: &str) -> Result<(), StoreError>;
}

// ── FileSummaryStore ───────────────────────────────────────────────

const PROGRESS_FILE: &str = "progress.json";
const PROGRESS_TMP_FILE: &str = ".progress.json.tmp";
const SUMMARY_PREFIX: &str = "summary-";
const JSON_SUFFIX: &str = ".json";

/// Directory-backed [`SummaryStore`].
#[derive(Debug)]
pub struct FileSummaryStore {
    root: PathBuf,
}

impl FileSummaryStore {
    /// Create a store, ensuring the root directory exists.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    /// The root directory holding one subdirectory per session.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a session. Rejects ids that could escape the root.
    fn session_dir(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        let invalid = session_id.is_empty()
            || session_id.starts_with('.')
            || session_id.contains(['/', '\\', '\0']);
        if invalid {
            return Err(StoreError::InvalidSessionId(session_id.to_string()));
        }
        Ok(self.root.join(session_id))
    }

    fn summary_filename(summary: &Summary) -> String {
        format!("{}{JSON_SUFFIX}", summary.storage_key())
    }

    fn is_summary_file(name: &str) -> bool {
        name.strip_prefix(SUMMARY_PREFIX)
            .and_then(|s| s.strip_suffix(JSON_SUFFIX))
            .is_some_and(|ts| ts.parse::<i64>().is_ok())
    }

    fn read_progress(&self, session_id: &str) -> Result<Option<SummaryProgress>, StoreError> {
        let path = self.session_dir(session_id)?.join(PROGRESS_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        let progress = serde_json::from_str(&json).map_err(|source| StoreError::Serde {
            what: path.display().to_string(),
            source,
        })?;
        Ok(Some(progress))
    }
}

/// Atomic write: serialize to `tmp_path`, then rename onto `final_path`.
fn write_json_atomic<T: Serialize>(
    value: &T,
    tmp_path: &Path,
    final_path: &Path,
) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Serde {
        what: final_path.display().to_string(),
        source,
    })?;
    std::fs::write(tmp_path, json).map_err(|e| StoreError::io(tmp_path, e))?;
    std::fs::rename(tmp_path, final_path).map_err(|e| StoreError::io(final_path, e))?;
    Ok(())
}

impl SummaryStore for FileSummaryStore {
    fn get_progress(&self, session_id: &str) -> SummaryProgress {
        match self.read_progress(session_id) {
            Ok(progress) => progress.unwrap_or_default(),
            Err(e) => {
                warn!("Falling back to empty progress for session {session_id}: {e}");
                SummaryProgress::default()
            }
        }
    }

    fn set_progress(&self, session_id: &str, progress: &SummaryProgress) -> Result<(), StoreError> {
        let dir = self.session_dir(session_id)?;
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        write_json_atomic(
            progress,
            &dir.join(PROGRESS_TMP_FILE),
            &dir.join(PROGRESS_FILE),
        )
    }

    fn append_summary(&self, session_id: &str, summary: &Summary) -> Result<(), StoreError> {
        let dir = self.session_dir(session_id)?;
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let filename = Self::summary_filename(summary);
        let final_path = dir.join(&filename);
        if final_path.exists() {
            return Err(StoreError::DuplicateSummary(summary.storage_key()));
        }
        write_json_atomic(summary, &dir.join(format!(".{filename}.tmp")), &final_path)?;
        debug!(
            "Stored summary {} for session {session_id} ({} messages)",
            summary.storage_key(),
            summary.message_count
        );
        Ok(())
    }

    fn list_summaries(&self, session_id: &str) -> Result<Vec<Summary>, StoreError> {
        let dir = self.session_dir(session_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let mut summaries = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !Self::is_summary_file(&name) {
                continue;
            }
            let path = entry.path();
            match std::fs::read_to_string(&path) {
                Ok(json) => match serde_json::from_str::<Summary>(&json) {
                    Ok(s) => summaries.push(s),
                    Err(e) => warn!("Skipping malformed summary at {}: {e}", path.display()),
                },
                Err(e) => warn!("Skipping unreadable summary at {}: {e}", path.display()),
            }
        }
        summaries.sort_by_key(|s| s.created_at);
        Ok(summaries)
    }

    fn delete_all(&self, session_id: &str) -> Result<(), StoreError> {
        let dir = self.session_dir(session_id)?;
        if !dir.exists() {
            return Ok(());
        }

        let entries = std::fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let mut total = 0;
        let mut failed = 0;
        for entry in entries {
            total += 1;
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("Failed to read entry in {}: {e}", dir.display());
                    failed += 1;
                    continue;
                }
            };
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to delete {}: {e}", path.display());
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(StoreError::PartialDelete { failed, total });
        }
        std::fs::remove_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        debug!("Deleted {total} stored item(s) for session {session_id}");
        Ok(())
    }
}

// ── InMemorySummaryStore ───────────────────────────────────────────

#[derive(Debug, Default)]
struct SessionRecords {
    progress: SummaryProgress,
    summaries: Vec<Summary>,
}

/// Mutex-guarded in-process [`SummaryStore`].
#[derive(Debug, Default)]
pub struct InMemorySummaryStore {
    sessions: Mutex<HashMap<String, SessionRecords>>,
}

impl InMemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sessions<R>(&self, f: impl FnOnce(&mut HashMap<String, SessionRecords>) -> R) -> R {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut sessions)
    }
}

impl SummaryStore for InMemorySummaryStore {
    fn get_progress(&self, session_id: &str) -> SummaryProgress {
        self.with_sessions(|s| {
            s.get(session_id)
                .map(|r| r.progress.clone())
                .unwrap_or_default()
        })
    }

    fn set_progress(&self, session_id: &str, progress: &SummaryProgress) -> Result<(), StoreError> {
        self.with_sessions(|s| {
            s.entry(session_id.to_string()).or_default().progress = progress.clone();
        });
        Ok(())
    }

    fn append_summary(&self, session_id: &str, summary: &Summary) -> Result<(), StoreError> {
        self.with_sessions(|s| {
            let records = s.entry(session_id.to_string()).or_default();
            if records
                .summaries
                .iter()
                .any(|existing| existing.created_at == summary.created_at)
            {
                return Err(StoreError::DuplicateSummary(summary.storage_key()));
            }
            records.summaries.push(summary.clone());
            records.summaries.sort_by_key(|x| x.created_at);
            Ok(())
        })
    }

    fn list_summaries(&self, session_id: &str) -> Result<Vec<Summary>, StoreError> {
        Ok(self.with_sessions(|s| {
            s.get(session_id)
                .map(|r| r.summaries.clone())
                .unwrap_or_default()
        }))
    }

    fn delete_all(&self, session_id: &str) -> Result<(), StoreError> {
        self.with_sessions(|s| s.remove(session_id));
        Ok(())
    }
}
