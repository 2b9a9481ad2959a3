//! Conversation context-window manager for LLM agent chat sessions.
//!
//! `convo-window` decides, on every turn, which parts of a growing
//! conversation are sent to the model. It keeps three promises:
//!
//! 1. **The token budget is never exceeded.** Costs are estimated with a cheap
//!    heuristic ([`context::estimator`]) and older summaries are dropped or
//!    truncated until the assembled input fits.
//! 2. **Paired blocks stay paired.** A retained `toolResult` always travels
//!    with its `toolUse` (and vice versa), and messages carrying model
//!    reasoning are pinned ([`context::truncation`]).
//! 3. **Old history is compacted, not lost.** A background scheduler
//!    summarizes the no-longer-recent slice of the conversation and persists
//!    the summaries for later turns ([`summary`]).
//!
//! # Getting started
//!
//! ```ignore
//! use std::sync::Arc;
//! use convo_window::prelude::*;
//!
//! let store = Arc::new(FileSummaryStore::new(".convo/summaries")?);
//! let engine = Arc::new(FallbackSummarizationEngine::default());
//! let manager = ContextManager::new(ContextConfig::default(), store, engine);
//!
//! // After appending a message to the session: fire-and-forget compaction.
//! manager.spawn_process_session_messages(&session.id, session.messages.clone(), None);
//!
//! // Before calling the model: build the bounded input.
//! let input = manager.generate_model_messages(&session.id, &session.messages, session.system_prompt.as_deref())?;
//! send_to_model(&input.system_prompt_text, &input.messages);
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | Token estimation, pairing-safe truncation, budgeted context building, rendering |
//! | [`summary`] | Summary records, stores, engines, and the compaction scheduler |
//! | [`manager`] | [`ContextManager`](manager::ContextManager) facade used by the host chat pipeline |
//! | [`api`] | OpenRouter chat client and retry policy used by the LLM summarization engine |
//! | [`session`] | Session files loaded by the CLI and tests |

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod prelude;
pub mod session;
pub mod summary;

use serde::{Deserialize, Serialize};

pub use config::ContextConfig;
pub use error::{ContextError, StoreError, SummarizationError};

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
///
/// There is deliberately no `System` role: the system prompt travels as a
/// separate string next to the message array.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolUse {
    #[serde(alias = "toolUseId")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Outcome status of a tool invocation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultStatus {
    #[default]
    Success,
    Error,
}

/// One piece of a tool result payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ToolResultContent {
    Text(String),
    Json(serde_json::Value),
}

/// The result of a tool invocation, linked to its [`ToolUse`] by id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_use_id: String,
    #[serde(default)]
    pub content: Vec<ToolResultContent>,
    #[serde(default)]
    pub status: ToolResultStatus,
}

/// Model reasoning (chain of thought) returned alongside a turn.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReasoningText {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// A single block of message content.
///
/// Serialized externally tagged: `{"text": ".."}`, `{"toolUse": {..}}`,
/// `{"toolResult": {..}}`, `{"reasoningText": {..}}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlock {
    Text(String),
    ToolUse(ToolUse),
    ToolResult(ToolResult),
    ReasoningText(ReasoningText),
}

/// A message in the conversation. Immutable once appended to a session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Unix epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content,
            id: None,
            timestamp: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::Text(text.into())])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::Text(text.into())])
    }

    /// An assistant turn consisting of a single tool call.
    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::new(
            Role::Assistant,
            vec![ContentBlock::ToolUse(ToolUse {
                id: id.into(),
                name: name.into(),
                input,
            })],
        )
    }

    /// A user turn carrying a successful text tool result.
    pub fn tool_result(tool_use_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            Role::User,
            vec![ContentBlock::ToolResult(ToolResult {
                tool_use_id: tool_use_id.into(),
                content: vec![ToolResultContent::Text(text.into())],
                status: ToolResultStatus::Success,
            })],
        )
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    /// Whether any block carries model reasoning.
    pub fn has_reasoning(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ReasoningText(_)))
    }

    /// Ids of every `toolUse` block in this message.
    pub fn tool_use_ids(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolUse(tu) => Some(tu.id.as_str()),
            _ => None,
        })
    }

    /// Ids referenced by every `toolResult` block in this message.
    pub fn tool_result_ids(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolResult(tr) => Some(tr.tool_use_id.as_str()),
            _ => None,
        })
    }

    /// Concatenated plain text of all `text` blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Check the structural contract of this message.
    ///
    /// `index` is only used to make the error point at the offending message.
    pub fn validate(&self, index: usize) -> Result<(), ContextError> {
        let malformed = |reason: &str| ContextError::MalformedMessage {
            index,
            reason: reason.to_string(),
        };

        if self.content.is_empty() {
            return Err(malformed("message has no content blocks"));
        }
        for block in &self.content {
            match block {
                ContentBlock::ToolUse(tu) => {
                    if tu.id.trim().is_empty() {
                        return Err(malformed("toolUse block has an empty id"));
                    }
                    if tu.name.trim().is_empty() {
                        return Err(malformed("toolUse block has an empty name"));
                    }
                }
                ContentBlock::ToolResult(tr) => {
                    if tr.tool_use_id.trim().is_empty() {
                        return Err(malformed("toolResult block has an empty toolUseId"));
                    }
                }
                ContentBlock::Text(_) | ContentBlock::ReasoningText(_) => {}
            }
        }
        Ok(())
    }
}

/// Validate every message in a history, failing on the first malformed one.
pub fn validate_messages(messages: &[Message]) -> Result<(), ContextError> {
    messages
        .iter()
        .enumerate()
        .try_for_each(|(i, m)| m.validate(i))
}
