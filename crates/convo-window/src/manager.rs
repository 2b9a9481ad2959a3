//! [`ContextManager`]: the single entry point for a host chat pipeline.
//!
//! ```text
//! append message ──► spawn_process_session_messages   (background, never awaited)
//! call model     ──► generate_model_messages           (on the request path)
//! delete session ──► delete_session_summaries
//! ```

use crate::context::assembler::{ModelInput, generate_model_messages};
use crate::context::builder::{ConversationContext, build_conversation_context};
use crate::context::truncation::limit_context_length;
use crate::summary::engine::SummarizationEngine;
use crate::summary::scheduler::{CompactionOutcome, SummarizationScheduler};
use crate::summary::store::SummaryStore;
use crate::{ContextConfig, ContextError, Message, StoreError};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Owns the configuration, summary store and scheduler for all sessions.
pub struct ContextManager {
    config: ContextConfig,
    store: Arc<dyn SummaryStore>,
    scheduler: Arc<SummarizationScheduler>,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ContextManager {
    pub fn new(
        config: ContextConfig,
        store: Arc<dyn SummaryStore>,
        engine: Arc<dyn SummarizationEngine>,
    ) -> Self {
        let scheduler = Arc::new(SummarizationScheduler::new(
            config.clone(),
            Arc::clone(&store),
            engine,
        ));
        Self {
            config,
            store,
            scheduler,
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SummaryStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<SummarizationScheduler> {
        &self.scheduler
    }

    /// Compact older history if due, waiting for the result.
    pub async fn process_session_messages(
        &self,
        session_id: &str,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> CompactionOutcome {
        self.scheduler
            .process_session_messages(session_id, messages, system_prompt)
            .await
    }

    /// Compact older history if due, in a background task.
    pub fn spawn_process_session_messages(
        &self,
        session_id: impl Into<String>,
        messages: Vec<Message>,
        system_prompt: Option<String>,
    ) -> JoinHandle<()> {
        self.scheduler
            .spawn_process_session_messages(session_id, messages, system_prompt)
    }

    pub fn build_conversation_context(
        &self,
        session_id: &str,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> Result<ConversationContext, ContextError> {
        build_conversation_context(
            &self.config,
            self.store.as_ref(),
            session_id,
            messages,
            system_prompt,
        )
    }

    pub fn generate_model_messages(
        &self,
        session_id: &str,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> Result<ModelInput, ContextError> {
        generate_model_messages(
            &self.config,
            self.store.as_ref(),
            session_id,
            messages,
            system_prompt,
        )
    }

    /// See [`limit_context_length`]; independent of summaries.
    pub fn limit_context_length(&self, messages: &[Message], retention_count: usize) -> Vec<Message> {
        limit_context_length(messages, retention_count)
    }

    /// Remove all summaries and progress of a session.
    pub async fn delete_session_summaries(&self, session_id: &str) -> Result<(), StoreError> {
        self.scheduler.delete_session_summaries(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::engine::FallbackSummarizationEngine;
    use crate::summary::store::InMemorySummaryStore;

    fn manager() -> ContextManager {
        ContextManager::new(
            ContextConfig::default(),
            Arc::new(InMemorySummaryStore::new()),
            Arc::new(FallbackSummarizationEngine),
        )
    }

    fn history(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i}"))
                } else {
                    Message::assistant(format!("answer {i}"))
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn compaction_then_generation() {
        let manager = manager();
        let msgs = history(14);

        manager
            .spawn_process_session_messages("s", msgs.clone(), None)
            .await
            .unwrap();

        let input = manager
            .generate_model_messages("s", &msgs, Some("Be helpful."))
            .unwrap();
        assert!(input.summarized);
        assert_eq!(input.messages, msgs[4..].to_vec());
        assert!(input.system_prompt_text.starts_with("Be helpful."));
        assert!(input.system_prompt_text.contains("question 0"));
    }

    #[tokio::test]
    async fn delete_resets_session() {
        let manager = manager();
        let msgs = history(14);
        manager.process_session_messages("s", &msgs, None).await;
        manager.delete_session_summaries("s").await.unwrap();

        let input = manager.generate_model_messages("s", &msgs, None).unwrap();
        assert!(!input.summarized);
        assert_eq!(input.system_prompt_text, "");
    }

    #[test]
    fn truncation_is_available_without_summaries() {
        let manager = manager();
        let out = manager.limit_context_length(&history(6), 2);
        assert_eq!(out, history(6)[4..].to_vec());
    }
}
