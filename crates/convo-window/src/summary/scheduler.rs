//! Background compaction of no-longer-recent history.
//!
//! After each append the host hands the full history to
//! [`SummarizationScheduler::spawn_process_session_messages`] and moves on.
//! The scheduler then decides whether enough has happened since the last
//! summary, summarizes the slice between the previous boundary and the start
//! of the retention window, and advances the session's [`SummaryProgress`].
//!
//! ```text
//! messages:  [ summarized ... | segment to summarize | last N (recent) ]
//!            0        last_message_index          len - N           len
//! ```
//!
//! Runs for the same session are serialized by a per-session async mutex:
//! a second run waits, re-reads progress, and usually finds nothing new to
//! do. A lock entry is dropped once no run or delete holds or awaits it, so
//! the map only holds sessions with work in flight. Failures never escape:
//! they are logged and progress stays put, so the next trigger retries.

use crate::summary::engine::{SummarizationEngine, SummarizeOptions};
use crate::summary::store::SummaryStore;
use crate::summary::SummaryProgress;
use crate::{ContextConfig, Message, StoreError};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What a single scheduler run did. Informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Too few new messages since the last summary.
    NotDue { new_messages: usize },
    /// Due, but everything outside the retention window is already covered.
    EmptySegment,
    /// A new summary was stored and progress advanced.
    Summarized {
        summary_key: String,
        messages_summarized: usize,
        last_message_index: usize,
    },
    /// The engine or the store failed; progress is unchanged unless the
    /// summary itself was already stored.
    Failed(String),
}

/// Decides when to summarize and keeps per-session progress.
pub struct SummarizationScheduler {
    config: ContextConfig,
    store: Arc<dyn SummaryStore>,
    engine: Arc<dyn SummarizationEngine>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for SummarizationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummarizationScheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SummarizationScheduler {
    pub fn new(
        config: ContextConfig,
        store: Arc<dyn SummaryStore>,
        engine: Arc<dyn SummarizationEngine>,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(session_id.to_string()).or_default().clone()
    }

    /// Drop the session's lock entry if nobody else holds or awaits it.
    ///
    /// The caller must have dropped its own clone first. Clones are only
    /// handed out under the map lock, so a count of one cannot race with a
    /// new waiter.
    fn release_session_lock(&self, session_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }
    }

    #[cfg(test)]
    fn tracked_sessions(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether a history of `message_count` messages is due for another summary.
    pub fn should_summarize(&self, progress: &SummaryProgress, message_count: usize) -> bool {
        progress.is_empty()
            || message_count.saturating_sub(progress.last_message_count)
                >= self.config.summarize_interval
    }

    /// Summarize the next segment of `messages` if due. Never fails.
    pub async fn process_session_messages(
        &self,
        session_id: &str,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> CompactionOutcome {
        let lock = self.session_lock(session_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.compact_locked(session_id, messages, system_prompt).await
        };
        drop(lock);
        self.release_session_lock(session_id);
        outcome
    }

    async fn compact_locked(
        &self,
        session_id: &str,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> CompactionOutcome {
        let progress = self.store.get_progress(session_id);
        let len = messages.len();

        if !self.should_summarize(&progress, len) {
            let new_messages = len.saturating_sub(progress.last_message_count);
            debug!(
                "Session {session_id}: {new_messages} new message(s) since last summary, not due"
            );
            return CompactionOutcome::NotDue { new_messages };
        }

        let start = progress.last_message_index;
        let end = len.saturating_sub(self.config.max_recent_messages);
        if start >= end {
            debug!("Session {session_id}: nothing outside the recent window to summarize");
            return CompactionOutcome::EmptySegment;
        }
        let segment = &messages[start..end];

        let options = SummarizeOptions {
            system_prompt: system_prompt.map(str::to_string),
            max_topics: self.config.max_summary_topics,
        };
        let mut summary = match self.engine.summarize(segment, &options).await {
            Ok(summary) => summary.with_topic_limit(self.config.max_summary_topics),
            Err(e) => {
                warn!("Session {session_id}: summarization of messages {start}..{end} failed: {e}");
                return CompactionOutcome::Failed(e.to_string());
            }
        };
        if summary.created_at <= progress.last_summarized_at {
            summary.created_at = progress.last_summarized_at + 1;
        }

        if let Err(e) = self.store.append_summary(session_id, &summary) {
            warn!("Session {session_id}: failed to store summary: {e}");
            return CompactionOutcome::Failed(e.to_string());
        }

        let summary_key = summary.storage_key();
        let mut summary_refs = progress.summary_refs;
        summary_refs.push(summary_key.clone());
        let next = SummaryProgress {
            last_summarized_at: summary.created_at,
            last_message_index: end,
            last_message_count: len,
            summary_refs,
        };
        if let Err(e) = self.store.set_progress(session_id, &next) {
            warn!("Session {session_id}: stored {summary_key} but failed to save progress: {e}");
            return CompactionOutcome::Failed(e.to_string());
        }

        info!(
            "Session {session_id}: summarized messages {start}..{end} into {summary_key} (~{} tokens)",
            summary.estimated_cost()
        );
        CompactionOutcome::Summarized {
            summary_key,
            messages_summarized: end - start,
            last_message_index: end,
        }
    }

    /// Run [`process_session_messages`](Self::process_session_messages) as an
    /// independent task. Panics inside the run are caught and logged.
    ///
    /// The returned handle may be dropped; awaiting it is only useful in
    /// tests and shutdown paths.
    pub fn spawn_process_session_messages(
        self: &Arc<Self>,
        session_id: impl Into<String>,
        messages: Vec<Message>,
        system_prompt: Option<String>,
    ) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let session_id = session_id.into();
        tokio::spawn(async move {
            let run = scheduler.process_session_messages(
                &session_id,
                &messages,
                system_prompt.as_deref(),
            );
            match AssertUnwindSafe(run).catch_unwind().await {
                Ok(outcome) => debug!("Session {session_id}: compaction finished: {outcome:?}"),
                Err(_) => error!("Session {session_id}: compaction task panicked"),
            }
        })
    }

    /// Delete every summary and the progress of a session.
    ///
    /// Waits for an in-flight run of the same session to finish first.
    pub async fn delete_session_summaries(&self, session_id: &str) -> Result<(), StoreError> {
        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.store.delete_all(session_id)
        };
        drop(lock);
        self.release_session_lock(session_id);
        match &result {
            Ok(()) => info!("Session {session_id}: deleted all summaries"),
            Err(e) => warn!("Session {session_id}: summary deletion incomplete: {e}"),
        }
        result
    }
}
