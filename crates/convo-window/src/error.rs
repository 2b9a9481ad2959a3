//! Error types for the context-window manager.
//!
//! Token estimation has no error type: it is pure arithmetic over strings and
//! cannot fail. Everything else falls into one of three families:
//!
//! - [`ContextError`] — malformed input handed to the builder/truncator by the
//!   host, or session/config files that cannot be read. These are caller bugs and
//!   are surfaced immediately.
//! - [`SummarizationError`] — the summarization engine (usually an LLM call)
//!   failed. The scheduler swallows these after logging.
//! - [`StoreError`] — the summary store could not read or write. Readers on
//!   the request path degrade to "no summaries"; writers leave progress
//!   untouched so the next trigger retries.

use std::path::PathBuf;

/// Errors raised for malformed conversation data.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// A message violates the content-block contract (empty tool id, etc.).
    #[error("malformed message at index {index}: {reason}")]
    MalformedMessage { index: usize, reason: String },

    #[error("file I/O error at {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    FileParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised by a [`SummarizationEngine`](crate::summary::engine::SummarizationEngine).
#[derive(Debug, thiserror::Error)]
pub enum SummarizationError {
    #[error("nothing to summarize")]
    EmptySegment,

    #[error("request failed: {0}")]
    Request(String),

    /// The request never got a response: connect failure, timeout or a
    /// dropped connection.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("API HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("API error: {0}")]
    Api(String),

    #[error("empty LLM response")]
    EmptyResponse,

    #[error("invalid summary payload: {0}")]
    InvalidPayload(String),
}

impl SummarizationError {
    /// Whether retrying the same call could plausibly succeed.
    ///
    /// Rate limits, gateway errors and transport failures are transient; bad
    /// requests, auth failures and malformed payloads are not.
    pub fn is_transient(&self) -> bool {
        match self {
            SummarizationError::Http { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            SummarizationError::Request(msg) => {
                let lower = msg.to_lowercase();
                [
                    "connection reset",
                    "connection refused",
                    "timed out",
                    "timeout",
                    "broken pipe",
                    "network",
                ]
                .iter()
                .any(|p| lower.contains(p))
            }
            SummarizationError::Transport(_) | SummarizationError::EmptyResponse => true,
            SummarizationError::EmptySegment
            | SummarizationError::Api(_)
            | SummarizationError::InvalidPayload(_) => false,
        }
    }
}

/// Errors raised by a [`SummaryStore`](crate::summary::store::SummaryStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize {what}: {source}")]
    Serde {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid session id {0:?}")]
    InvalidSessionId(String),

    #[error("summary {0} already exists")]
    DuplicateSummary(String),

    /// Best-effort deletion finished but some items could not be removed.
    #[error("failed to delete {failed} of {total} stored items")]
    PartialDelete { failed: usize, total: usize },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_http_statuses() {
        for status in [429, 500, 502, 503, 504] {
            let err = SummarizationError::Http {
                status,
                body: String::new(),
            };
            assert!(err.is_transient(), "{status} should be transient");
        }
        let bad_request = SummarizationError::Http {
            status: 400,
            body: "bad request".into(),
        };
        assert!(!bad_request.is_transient());
    }

    #[test]
    fn transport_failures_are_transient() {
        assert!(SummarizationError::Transport("error sending request".into()).is_transient());
        assert!(SummarizationError::Request("connection reset by peer".into()).is_transient());
        assert!(SummarizationError::Request("operation timed out".into()).is_transient());
        assert!(!SummarizationError::Request("builder error".into()).is_transient());
    }

    #[test]
    fn payload_errors_are_permanent() {
        assert!(!SummarizationError::InvalidPayload("missing summary".into()).is_transient());
        assert!(!SummarizationError::EmptySegment.is_transient());
    }

    #[test]
    fn display_includes_context() {
        let err = ContextError::MalformedMessage {
            index: 3,
            reason: "toolUse block has an empty id".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed message at index 3: toolUse block has an empty id"
        );
    }
}
