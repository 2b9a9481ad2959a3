//! Convenience re-exports for common `convo-window` types.
//!
//! ```ignore
//! use convo_window::prelude::*;
//! ```
//!
//! Covers what a host chat pipeline needs: message types, the
//! [`ContextManager`] facade, stores, engines and the standalone context
//! functions. HTTP client and retry types stay in [`crate::api`].

// ── Messages ────────────────────────────────────────────────────────
pub use crate::{
    ContentBlock, Message, ReasoningText, Role, ToolResult, ToolResultContent, ToolResultStatus,
    ToolUse,
};

// ── Configuration and errors ────────────────────────────────────────
pub use crate::{ContextConfig, ContextError, StoreError, SummarizationError};

// ── Context building ────────────────────────────────────────────────
pub use crate::context::assembler::render;
pub use crate::context::{
    ContextBreakdown, ConversationContext, ModelInput, build_conversation_context,
    generate_model_messages, limit_context_length,
};

// ── Summaries ───────────────────────────────────────────────────────
pub use crate::summary::engine::{
    FallbackSummarizationEngine, LlmSummarizationEngine, SummarizationEngine, SummarizeOptions,
};
pub use crate::summary::scheduler::{CompactionOutcome, SummarizationScheduler};
pub use crate::summary::store::{FileSummaryStore, InMemorySummaryStore, SummaryStore};
pub use crate::summary::{Summary, SummaryProgress};

// ── Facade and sessions ─────────────────────────────────────────────
pub use crate::manager::ContextManager;
pub use crate::session::Session;
