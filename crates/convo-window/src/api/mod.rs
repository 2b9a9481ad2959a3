//! HTTP access to the summarization model.
//!
//! - [`client`] — [`OpenRouterClient`] for chat completions with structured
//!   (`json_schema`) output.
//! - [`retry`] — exponential backoff for transient failures (429, 5xx,
//!   network timeouts). Never retries 400/401 errors.

pub mod client;
pub mod retry;

pub use client::{ChatMessage, ChatRequest, OpenRouterClient, ResponseFormat, json_schema_for};
pub use retry::{RetryConfig, retry_with_backoff};
