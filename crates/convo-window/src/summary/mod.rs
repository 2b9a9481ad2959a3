//! Summaries of older conversation history and the machinery that makes them.
//!
//! - [`store`] — the [`SummaryStore`](store::SummaryStore) persistence
//!   interface, with a directory-backed and an in-memory implementation.
//! - [`engine`] — the [`SummarizationEngine`](engine::SummarizationEngine)
//!   interface: an LLM-backed engine and a deterministic offline fallback.
//! - [`scheduler`] — decides when to compact, runs the engine, and advances
//!   the per-session [`SummaryProgress`].

pub mod engine;
pub mod scheduler;
pub mod store;

use crate::Message;
use crate::context::estimator::{ELLIPSIS_TOKENS, estimate, estimate_structured, truncate};
use serde::{Deserialize, Serialize};

/// A compacted description of a contiguous, no-longer-recent slice of history.
///
/// Immutable after creation; deleted only together with its session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub summary_text: String,
    #[serde(default)]
    pub summary_topics: Vec<String>,
    /// Ids of the summarized messages that carried one.
    #[serde(default)]
    pub original_message_ids: Vec<String>,
    /// Unix epoch milliseconds. Unique and increasing within a session.
    pub created_at: i64,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
}

impl Summary {
    /// Build a summary of `messages`, stamped with the current time.
    pub fn new(summary_text: impl Into<String>, summary_topics: Vec<String>, messages: &[Message]) -> Self {
        let summary_text = summary_text.into();
        let token_count = Some(estimate(&summary_text));
        Self {
            summary_text,
            summary_topics,
            original_message_ids: messages.iter().filter_map(|m| m.id.clone()).collect(),
            created_at: now_millis(),
            message_count: messages.len(),
            token_count,
        }
    }

    /// Keep at most `max` topics.
    pub fn with_topic_limit(mut self, max: usize) -> Self {
        self.summary_topics.truncate(max);
        self
    }

    /// Key identifying this summary inside its session's store.
    pub fn storage_key(&self) -> String {
        format!("summary-{}", self.created_at)
    }

    /// Estimated cost when rendered into a context: text plus topic list.
    pub fn estimated_cost(&self) -> usize {
        estimate(&self.summary_text) + self.topics_cost()
    }

    /// Estimated cost of the topic list alone.
    pub fn topics_cost(&self) -> usize {
        estimate_structured(&self.summary_topics)
    }

    /// A copy whose text is cut so that text plus truncation marker fit in
    /// `max_text_tokens`.
    pub fn truncated_to(&self, max_text_tokens: usize) -> Summary {
        let summary_text = truncate(
            &self.summary_text,
            max_text_tokens.saturating_sub(ELLIPSIS_TOKENS),
        );
        Summary {
            token_count: Some(estimate(&summary_text)),
            summary_text,
            ..self.clone()
        }
    }
}

/// Per-session compaction progress. Zeroed until the first summary exists.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SummaryProgress {
    /// `created_at` of the newest summary, `0` if none yet.
    pub last_summarized_at: i64,
    /// Index of the first message not yet covered by a summary.
    pub last_message_index: usize,
    /// History length when the last summary was produced.
    pub last_message_count: usize,
    /// Storage keys of the summaries produced so far, oldest first.
    pub summary_refs: Vec<String>,
}

impl SummaryProgress {
    pub fn is_empty(&self) -> bool {
        self.last_summarized_at == 0
    }
}

/// Current Unix epoch in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
