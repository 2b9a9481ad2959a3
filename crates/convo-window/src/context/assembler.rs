//! Rendering a [`ConversationContext`] into model input.
//!
//! The model receives two things: a message array and a system prompt
//! string. Summaries never become messages; they are appended to the system
//! prompt, oldest first so the narrative reads in order, even though the
//! builder selected them newest first.

use crate::context::builder::{ConversationContext, build_conversation_context};
use crate::summary::Summary;
use crate::summary::store::SummaryStore;
use crate::{ContextConfig, ContextError, Message};
use std::fmt::Write;
use tracing::debug;

/// Heading of the generated summary section.
pub const SUMMARY_SECTION_HEADING: &str = "## Earlier conversation";

/// Bounded, render-ready input for one model call.
///
/// `system_prompt_text` must go through the model's system-prompt channel;
/// `messages` contains only user and assistant turns.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
    pub messages: Vec<Message>,
    pub system_prompt_text: String,
    /// Whether any summary was rendered into `system_prompt_text`.
    pub summarized: bool,
}

/// Build the bounded context for a session and render it.
pub fn generate_model_messages(
    config: &ContextConfig,
    store: &dyn SummaryStore,
    session_id: &str,
    messages: &[Message],
    system_prompt: Option<&str>,
) -> Result<ModelInput, ContextError> {
    let context = build_conversation_context(config, store, session_id, messages, system_prompt)?;
    debug!(
        "Session {session_id}: {}",
        context.breakdown(config).to_log_string()
    );
    Ok(render(context))
}

/// Render an already-built context.
pub fn render(context: ConversationContext) -> ModelInput {
    let ConversationContext {
        system_prompt,
        summaries,
        recent_messages,
    } = context;

    let base = system_prompt.unwrap_or_default();
    if summaries.is_empty() {
        return ModelInput {
            messages: recent_messages,
            system_prompt_text: base,
            summarized: false,
        };
    }

    let section = render_summary_section(&summaries);
    let system_prompt_text = if base.is_empty() {
        section
    } else {
        format!("{base}\n\n{section}")
    };

    ModelInput {
        messages: recent_messages,
        system_prompt_text,
        summarized: true,
    }
}

/// Render summaries as numbered blocks, oldest first, each with its text and
/// a bulleted topic list.
pub fn render_summary_section(summaries: &[Summary]) -> String {
    let mut ordered: Vec<&Summary> = summaries.iter().collect();
    ordered.sort_by_key(|s| s.created_at);

    let mut out = String::new();
    out.push_str(SUMMARY_SECTION_HEADING);
    out.push_str("\n\n");
    out.push_str(
        "Older parts of this conversation are no longer shown verbatim. \
         They are summarized below, oldest first.\n",
    );

    for (i, summary) in ordered.iter().enumerate() {
        let _ = write!(out, "\n### Summary {}\n{}\n", i + 1, summary.summary_text.trim());
        if !summary.summary_topics.is_empty() {
            out.push_str("\nTopics:\n");
            for topic in &summary.summary_topics {
                let _ = writeln!(out, "- {topic}");
            }
        }
    }
    out
}
