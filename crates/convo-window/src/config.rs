//! Tuning knobs for context building and background compaction.
//!
//! Every field has a default that matches the reference chat application, so
//! most hosts only need [`ContextConfig::default()`]. Override individual
//! settings with the builder methods, or load a JSON file where every field
//! is optional.
//!
//! # Examples
//!
//! ```
//! use convo_window::ContextConfig;
//!
//! let config = ContextConfig::default()
//!     .with_max_recent_messages(20)
//!     .with_token_limit(128_000, 16_000);
//! assert_eq!(config.token_budget(), 112_000);
//! ```
//!
//! A config file only needs the fields it changes:
//!
//! ```json
//! { "max_recent_messages": 20, "summarize_interval": 8 }
//! ```

use crate::ContextError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of most recent messages always kept verbatim.
pub const DEFAULT_MAX_RECENT_MESSAGES: usize = 10;
/// Messages that must accumulate before another summary is produced.
pub const DEFAULT_SUMMARIZE_INTERVAL: usize = 5;
/// Estimated-token ceiling for one model call.
pub const DEFAULT_MAX_TOKEN_LIMIT: usize = 64_000;
/// Headroom subtracted from the ceiling (response tokens, estimator error).
pub const DEFAULT_TOKEN_BUFFER: usize = 10_000;
/// Maximum topics carried by one summary.
pub const DEFAULT_MAX_SUMMARY_TOPICS: usize = 5;
/// A partially fitting summary is only kept if at least this many tokens of
/// its text survive truncation.
pub const DEFAULT_MIN_TRUNCATED_SUMMARY_TOKENS: usize = 100;

/// Configuration shared by the builder, the assembler and the scheduler.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    /// Size of the retention window. Default: `10`.
    pub max_recent_messages: usize,
    /// New messages required before re-summarizing. Default: `5`.
    pub summarize_interval: usize,
    /// Token ceiling per model call. Default: `64000`.
    pub max_token_limit: usize,
    /// Reserved headroom below the ceiling. Default: `10000`.
    pub token_buffer: usize,
    /// Topic cap per summary. Default: `5`.
    pub max_summary_topics: usize,
    /// Minimum surviving text tokens for a truncated summary. Default: `100`.
    pub min_truncated_summary_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_recent_messages: DEFAULT_MAX_RECENT_MESSAGES,
            summarize_interval: DEFAULT_SUMMARIZE_INTERVAL,
            max_token_limit: DEFAULT_MAX_TOKEN_LIMIT,
            token_buffer: DEFAULT_TOKEN_BUFFER,
            max_summary_topics: DEFAULT_MAX_SUMMARY_TOPICS,
            min_truncated_summary_tokens: DEFAULT_MIN_TRUNCATED_SUMMARY_TOKENS,
        }
    }
}

impl ContextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retention window size.
    pub fn with_max_recent_messages(mut self, n: usize) -> Self {
        self.max_recent_messages = n;
        self
    }

    /// Set how many new messages trigger another summary.
    pub fn with_summarize_interval(mut self, n: usize) -> Self {
        self.summarize_interval = n;
        self
    }

    /// Set the token ceiling and the headroom kept below it.
    pub fn with_token_limit(mut self, max_token_limit: usize, token_buffer: usize) -> Self {
        self.max_token_limit = max_token_limit;
        self.token_buffer = token_buffer;
        self
    }

    pub fn with_max_summary_topics(mut self, n: usize) -> Self {
        self.max_summary_topics = n;
        self
    }

    pub fn with_min_truncated_summary_tokens(mut self, n: usize) -> Self {
        self.min_truncated_summary_tokens = n;
        self
    }

    /// Effective budget for an assembled context: `max_token_limit - token_buffer`.
    pub fn token_budget(&self) -> usize {
        self.max_token_limit.saturating_sub(self.token_buffer)
    }

    /// Reject settings that would make the pipeline degenerate.
    pub fn validate(&self) -> Result<(), ContextError> {
        if self.max_recent_messages == 0 {
            return Err(ContextError::InvalidConfig(
                "max_recent_messages must be at least 1".into(),
            ));
        }
        if self.summarize_interval == 0 {
            return Err(ContextError::InvalidConfig(
                "summarize_interval must be at least 1".into(),
            ));
        }
        if self.token_buffer >= self.max_token_limit {
            return Err(ContextError::InvalidConfig(format!(
                "token_buffer ({}) must be smaller than max_token_limit ({})",
                self.token_buffer, self.max_token_limit
            )));
        }
        Ok(())
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ContextError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ContextError::FileIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&json).map_err(|source| ContextError::FileParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let config = ContextConfig::default();
        assert_eq!(config.max_recent_messages, 10);
        assert_eq!(config.summarize_interval, 5);
        assert_eq!(config.max_token_limit, 64_000);
        assert_eq!(config.token_buffer, 10_000);
        assert_eq!(config.token_budget(), 54_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_methods_override_fields() {
        let config = ContextConfig::new()
            .with_max_recent_messages(4)
            .with_summarize_interval(2)
            .with_token_limit(1_000, 200)
            .with_max_summary_topics(3)
            .with_min_truncated_summary_tokens(10);
        assert_eq!(config.max_recent_messages, 4);
        assert_eq!(config.summarize_interval, 2);
        assert_eq!(config.token_budget(), 800);
        assert_eq!(config.max_summary_topics, 3);
        assert_eq!(config.min_truncated_summary_tokens, 10);
    }

    #[test]
    fn validate_rejects_degenerate_settings() {
        assert!(
            ContextConfig::default()
                .with_max_recent_messages(0)
                .validate()
                .is_err()
        );
        assert!(
            ContextConfig::default()
                .with_summarize_interval(0)
                .validate()
                .is_err()
        );
        assert!(
            ContextConfig::default()
                .with_token_limit(100, 100)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn partial_json_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_recent_messages": 20}"#).unwrap();

        let config = ContextConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_recent_messages, 20);
        assert_eq!(config.summarize_interval, DEFAULT_SUMMARIZE_INTERVAL);
    }

    #[test]
    fn invalid_json_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ContextConfig::from_json_file(&path),
            Err(ContextError::FileParse { .. })
        ));
        assert!(matches!(
            ContextConfig::from_json_file(dir.path().join("missing.json")),
            Err(ContextError::FileIo { .. })
        ));
    }
}
