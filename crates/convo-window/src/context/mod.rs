//! Deciding what the model sees on each call.
//!
//! 1. **[`estimator`]** — heuristic token costs and text truncation.
//!
//! 2. **[`truncation`]** — [`limit_context_length`] caps a history at a
//!    message count without breaking tool-call pairing or dropping reasoning.
//!    Usable on its own, independently of summarization.
//!
//! 3. **[`builder`]** — [`build_conversation_context`] assembles system
//!    prompt, stored summaries and the retention window within the token
//!    budget. Only summaries are ever trimmed.
//!
//! 4. **[`assembler`]** — [`generate_model_messages`] renders a built context
//!    into a message array plus an augmented system prompt.

pub mod assembler;
pub mod builder;
pub mod estimator;
pub mod truncation;

pub use assembler::{ModelInput, generate_model_messages, render_summary_section};
pub use builder::{ContextBreakdown, ConversationContext, build_conversation_context};
pub use truncation::{limit_context_length, try_limit_context_length};
