//! Turning a slice of conversation into a [`Summary`].
//!
//! [`SummarizationEngine`] is the seam between the scheduler and whatever
//! produces summaries. [`LlmSummarizationEngine`] asks a chat model for a
//! structured `{summary, topics}` object; [`FallbackSummarizationEngine`]
//! needs no network and is what the LLM engine degrades to when the model
//! cannot be reached.

use crate::api::client::{
    ChatMessage, ChatRequest, DEFAULT_MODEL, OpenRouterClient, ResponseFormat, json_schema_for,
};
use crate::api::retry::{RetryConfig, retry_with_backoff};
use crate::config::DEFAULT_MAX_SUMMARY_TOPICS;
use crate::summary::Summary;
use crate::{ContentBlock, Message, Role, SummarizationError, ToolResultContent, ToolResultStatus};
use schemars::JsonSchema;
use serde::Deserialize;
use std::fmt::Write;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

/// Future returned by [`SummarizationEngine::summarize`].
pub type SummaryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Summary, SummarizationError>> + Send + 'a>>;

/// Characters of the first user message kept by [`fallback_summary`].
pub const FALLBACK_SNIPPET_CHARS: usize = 200;

/// Per-call options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarizeOptions {
    /// The session's system prompt, given to the model as background.
    pub system_prompt: Option<String>,
    /// Topic cap for the produced summary.
    pub max_topics: usize,
}

impl Default for SummarizeOptions {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_topics: DEFAULT_MAX_SUMMARY_TOPICS,
        }
    }
}

/// Produces a [`Summary`] of a contiguous run of messages.
///
/// Implementations must fail with [`SummarizationError::EmptySegment`] for
/// an empty slice rather than inventing a summary.
pub trait SummarizationEngine: Send + Sync {
    fn summarize<'a>(
        &'a self,
        messages: &'a [Message],
        options: &'a SummarizeOptions,
    ) -> SummaryFuture<'a>;
}

// ── Prompting ──────────────────────────────────────────────────────

const SUMMARIZATION_PROMPT: &str = "\
You compress older parts of a chat between a user and an AI assistant so the \
assistant can keep working after those messages leave its context window.

Write a summary that covers:
- What the user asked for and any constraints they set
- What the assistant did, including tool calls and their outcomes
- Decisions made and conclusions reached
- Open questions and work still pending

Rules:
- Only include facts explicitly stated in the messages. Do not infer or extrapolate.
- Preserve names, file paths, identifiers and numbers verbatim.
- Be concise. Every token must earn its place.
- Write in the third person (\"The user asked...\", \"The assistant found...\").

Respond with a JSON object: `summary` is the summary text, `topics` lists \
short noun phrases for the main subjects discussed, most important first.";

/// Build the system prompt for one summarization call.
pub fn summarization_prompt(options: &SummarizeOptions) -> String {
    let mut prompt = SUMMARIZATION_PROMPT.to_string();
    let _ = write!(prompt, " Give at most {} topics.", options.max_topics);
    if let Some(ref system) = options.system_prompt
        && !system.trim().is_empty()
    {
        prompt.push_str("\n\nThe assistant in this chat was configured with this system prompt:\n");
        prompt.push_str("<system_prompt>\n");
        prompt.push_str(system.trim());
        prompt.push_str("\n</system_prompt>");
    }
    prompt
}

/// Render messages as a plain-text transcript for the summarization model.
///
/// Reasoning blocks are left out; they are the model's private scratchpad,
/// not part of the conversation.
pub fn format_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        let _ = write!(out, "[{}]:", msg.role);
        for block in &msg.content {
            match block {
                ContentBlock::Text(text) => {
                    let _ = write!(out, " {text}");
                }
                ContentBlock::ToolUse(tu) => {
                    let _ = write!(out, " [tool call {} ({})] {}", tu.name, tu.id, tu.input);
                }
                ContentBlock::ToolResult(tr) => {
                    let status = match tr.status {
                        ToolResultStatus::Success => "success",
                        ToolResultStatus::Error => "error",
                    };
                    let _ = write!(out, " [tool result {} ({status})]", tr.tool_use_id);
                    for part in &tr.content {
                        match part {
                            ToolResultContent::Text(t) => {
                                let _ = write!(out, " {t}");
                            }
                            ToolResultContent::Json(v) => {
                                let _ = write!(out, " {v}");
                            }
                        }
                    }
                }
                ContentBlock::ReasoningText(_) => {}
            }
        }
        out.push_str("\n\n");
    }
    out
}

// ── Structured output ──────────────────────────────────────────────

/// The JSON object the model is asked to return.
#[derive(Deserialize, JsonSchema, Debug, Clone, PartialEq)]
pub struct SummaryPayload {
    /// The summary text.
    pub summary: String,
    /// Main subjects discussed, most important first.
    pub topics: Vec<String>,
}

/// Strip a Markdown code fence some models wrap around JSON output.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map_or(trimmed, str::trim)
}

/// Parse and schema-validate a model response.
pub fn parse_summary_payload(content: &str) -> Result<SummaryPayload, SummarizationError> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| SummarizationError::InvalidPayload(format!("not JSON: {e}")))?;

    let schema = json_schema_for::<SummaryPayload>();
    match jsonschema::validator_for(&schema) {
        Ok(validator) => {
            let errors: Vec<String> = validator
                .iter_errors(&value)
                .map(|e| format!("{}: {e}", e.instance_path()))
                .collect();
            if !errors.is_empty() {
                return Err(SummarizationError::InvalidPayload(errors.join("; ")));
            }
        }
        Err(e) => warn!("Summary schema failed to compile, skipping validation: {e}"),
    }

    let payload: SummaryPayload = serde_json::from_value(value)
        .map_err(|e| SummarizationError::InvalidPayload(e.to_string()))?;
    if payload.summary.trim().is_empty() {
        return Err(SummarizationError::InvalidPayload("summary is empty".into()));
    }
    Ok(payload)
}

fn summary_from_payload(payload: SummaryPayload, messages: &[Message], max_topics: usize) -> Summary {
    let topics = payload
        .topics
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    Summary::new(payload.summary.trim(), topics, messages).with_topic_limit(max_topics)
}

// ── Fallback ───────────────────────────────────────────────────────

/// Deterministic summary built without a model: the leading text of the
/// first user message, with no topics.
pub fn fallback_summary(messages: &[Message]) -> Summary {
    let snippet = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(Message::text)
        .find(|t| !t.trim().is_empty())
        .map(|t| t.trim().chars().take(FALLBACK_SNIPPET_CHARS).collect::<String>());

    let text = match snippet {
        Some(s) => s,
        None => format!("{} earlier messages without user text.", messages.len()),
    };
    Summary::new(text, Vec::new(), messages)
}

/// Engine that always produces [`fallback_summary`]. Needs no network.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackSummarizationEngine;

impl SummarizationEngine for FallbackSummarizationEngine {
    fn summarize<'a>(
        &'a self,
        messages: &'a [Message],
        _options: &'a SummarizeOptions,
    ) -> SummaryFuture<'a> {
        Box::pin(async move {
            if messages.is_empty() {
                return Err(SummarizationError::EmptySegment);
            }
            Ok(fallback_summary(messages))
        })
    }
}

// ── LLM engine ─────────────────────────────────────────────────────

/// Settings for [`LlmSummarizationEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model used for summarization; a cheap one is usually enough.
    pub model: String,
    /// Maximum tokens for the summarization response.
    pub max_summary_tokens: u32,
    pub temperature: f32,
    pub retry: RetryConfig,
    /// Return [`fallback_summary`] instead of an error when the model call
    /// fails for good.
    pub fallback_on_error: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_summary_tokens: 1024,
            temperature: 0.3,
            retry: RetryConfig::default(),
            fallback_on_error: true,
        }
    }
}

impl EngineConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_summary_tokens(mut self, tokens: u32) -> Self {
        self.max_summary_tokens = tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_fallback_on_error(mut self, enabled: bool) -> Self {
        self.fallback_on_error = enabled;
        self
    }
}

/// Summarizes through a chat model with structured JSON output.
#[derive(Debug)]
pub struct LlmSummarizationEngine {
    client: OpenRouterClient,
    config: EngineConfig,
}

impl LlmSummarizationEngine {
    pub fn new(client: OpenRouterClient, config: EngineConfig) -> Self {
        Self { client, config }
    }

    /// Engine using the `OPENROUTER_KEY` environment variable.
    pub fn from_env(config: EngineConfig) -> Result<Self, SummarizationError> {
        Ok(Self::new(OpenRouterClient::from_env()?, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn build_request(&self, messages: &[Message], options: &SummarizeOptions) -> ChatRequest {
        ChatRequest {
            model: Some(self.config.model.clone()),
            messages: vec![
                ChatMessage::system(summarization_prompt(options)),
                ChatMessage::user(format_transcript(messages)),
            ],
            max_tokens: self.config.max_summary_tokens,
            temperature: self.config.temperature,
            response_format: Some(ResponseFormat::json_schema_for::<SummaryPayload>(
                "conversation_summary",
            )),
        }
    }

    async fn summarize_with_model(
        &self,
        messages: &[Message],
        options: &SummarizeOptions,
    ) -> Result<Summary, SummarizationError> {
        let request = self.build_request(messages, options);
        let request = &request;
        let client = &self.client;

        let payload = retry_with_backoff(&self.config.retry, "Summarization call", || async move {
            let completion = client.chat(request).await?;
            let content = completion
                .content
                .filter(|c| !c.trim().is_empty())
                .ok_or(SummarizationError::EmptyResponse)?;
            parse_summary_payload(&content)
        })
        .await?;

        Ok(summary_from_payload(payload, messages, options.max_topics))
    }
}

impl SummarizationEngine for LlmSummarizationEngine {
    fn summarize<'a>(
        &'a self,
        messages: &'a [Message],
        options: &'a SummarizeOptions,
    ) -> SummaryFuture<'a> {
        Box::pin(async move {
            if messages.is_empty() {
                return Err(SummarizationError::EmptySegment);
            }
            match self.summarize_with_model(messages, options).await {
                Ok(summary) => {
                    debug!(
                        "Summarized {} messages into ~{} tokens, {} topic(s)",
                        messages.len(),
                        summary.token_count.unwrap_or(0),
                        summary.summary_topics.len()
                    );
                    Ok(summary)
                }
                Err(e) if self.config.fallback_on_error => {
                    warn!("Summarization model failed, using fallback summary: {e}");
                    Ok(fallback_summary(messages))
                }
                Err(e) => Err(e),
            }
        })
    }
}
