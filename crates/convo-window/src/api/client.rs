//! Minimal async client for the OpenRouter chat completions API.
//!
//! Only what summarization needs: plain-text messages, generation limits, and
//! structured output via `response_format: json_schema`.

use crate::SummarizationError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for summarization calls.
pub const DEFAULT_MODEL: &str = "z-ai/glm-5";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENROUTER_KEY";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Generate a JSON Schema value for `T`, for use in a `json_schema`
/// response format.
///
/// ```
/// use convo_window::api::client::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct Recap {
///     summary: String,
///     topics: Vec<String>,
/// }
///
/// let schema = json_schema_for::<Recap>();
/// assert_eq!(schema["type"], "object");
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

/// Like [`json_schema_for`], shaped for strict structured output: no
/// `$schema`/`title` at the root, and every object closed with
/// `additionalProperties: false`.
pub fn strict_json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let mut schema = json_schema_for::<T>();
    if let Some(root) = schema.as_object_mut() {
        root.remove("$schema");
        root.remove("title");
    }
    close_objects(&mut schema);
    schema
}

fn close_objects(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if map.get("type").and_then(|t| t.as_str()) == Some("object") {
                map.entry("additionalProperties")
                    .or_insert(serde_json::Value::Bool(false));
            }
            map.values_mut().for_each(close_objects);
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}

// ── Request types ──────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

/// A plain-text chat message in OpenAI wire format.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Chat completion request body. Unused optional fields are omitted.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ResponseFormatType {
    #[serde(rename = "json_schema")]
    JsonSchema,
}

/// Schema attached to a `json_schema` response format.
#[derive(Serialize, Debug, Clone)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub strict: bool,
    pub schema: serde_json::Value,
}

/// Structured output mode.
#[derive(Serialize, Debug, Clone)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub fmt_type: ResponseFormatType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<JsonSchemaFormat>,
}

impl ResponseFormat {
    /// Require output matching the schema of `T`.
    pub fn json_schema_for<T: JsonSchema>(name: impl Into<String>) -> Self {
        Self {
            fmt_type: ResponseFormatType::JsonSchema,
            json_schema: Some(JsonSchemaFormat {
                name: name.into(),
                strict: true,
                schema: strict_json_schema_for::<T>(),
            }),
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    usage: Option<UsageInfo>,
    error: Option<ApiErrorResponse>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Clean return type from [`OpenRouterClient::chat`].
#[derive(Debug, Default)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Parse a raw response body into a [`ChatCompletion`].
fn parse_chat_response(text: &str) -> Result<ChatCompletion, SummarizationError> {
    let parsed: RawChatResponse = serde_json::from_str(text)
        .map_err(|e| SummarizationError::InvalidPayload(format!("failed to parse response: {e}")))?;

    if let Some(err) = parsed.error {
        return Err(SummarizationError::Api(err.message));
    }

    if let Some(ref usage) = parsed.usage {
        debug!(
            "Token usage: prompt={}, completion={}, total={}",
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
            usage.total_tokens.unwrap_or(0),
        );
    }

    let choice = parsed.choices.and_then(|c| c.into_iter().next());
    Ok(match choice {
        Some(c) => ChatCompletion {
            content: c.message.content,
            usage: parsed.usage,
            finish_reason: c.finish_reason,
        },
        None => {
            debug!("LLM output: empty (no choices)");
            ChatCompletion {
                usage: parsed.usage,
                ..Default::default()
            }
        }
    })
}

/// Connect failures, timeouts and requests that never got a response are
/// transport errors; anything else (bad URL, body encoding) is permanent.
fn classify_send_error(e: reqwest::Error) -> SummarizationError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        SummarizationError::Transport(e.to_string())
    } else {
        SummarizationError::Request(e.to_string())
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    referer: String,
    title: String,
}

impl std::fmt::Debug for OpenRouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterClient")
            .field("endpoint", &self.endpoint)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

impl OpenRouterClient {
    /// Create a client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, SummarizationError> {
        Self::with_headers(
            api_key,
            "https://github.com/convo-window/convo-window",
            "convo-window",
        )
    }

    /// Create a client reading the key from `OPENROUTER_KEY`.
    pub fn from_env() -> Result<Self, SummarizationError> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| SummarizationError::Request(format!("{API_KEY_ENV} not set")))?;
        Self::new(api_key)
    }

    /// Create a client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, SummarizationError> {
        let client = reqwest::Client::builder()
            .user_agent("convo-window/0.1")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SummarizationError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: OPENROUTER_URL.to_string(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    /// Point the client at a different OpenAI-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, SummarizationError> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={}, temp={}",
            body.model.as_deref().unwrap_or("(none)"),
            body.messages.len(),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| SummarizationError::Transport(format!("failed to read response: {e}")))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(SummarizationError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_chat_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Recap {
        summary: String,
        topics: Vec<String>,
    }

    #[test]
    fn request_omits_unset_fields() {
        let body = ChatRequest {
            model: Some("m".into()),
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["messages"][0]["role"], "user");
        assert!(value.get("max_tokens").is_none());
        assert!(value.get("temperature").is_none());
        assert!(value.get("response_format").is_none());
    }

    #[test]
    fn json_schema_response_format_serializes() {
        let format = ResponseFormat::json_schema_for::<Recap>("recap");
        let value = serde_json::to_value(&format).unwrap();
        assert_eq!(value["type"], "json_schema");
        assert_eq!(value["json_schema"]["name"], "recap");
        assert_eq!(value["json_schema"]["strict"], true);
        let schema = &value["json_schema"]["schema"];
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["additionalProperties"], false);
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
        assert_eq!(schema["required"], json!(["summary", "topics"]));
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Outer {
        inner: Recap,
    }

    #[test]
    fn strict_schema_closes_nested_objects() {
        let schema = strict_json_schema_for::<Outer>();
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["definitions"]["Recap"]["additionalProperties"], false);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transient_transport_error() {
        let client = OpenRouterClient::new("key")
            .unwrap()
            .with_endpoint("http://127.0.0.1:1/v1/chat/completions");
        let err = client.chat(&ChatRequest::default()).await.unwrap_err();
        assert!(err.is_transient(), "{err}");
    }

    #[test]
    fn parses_first_choice() {
        let body = json!({
            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        })
        .to_string();
        let completion = parse_chat_response(&body).unwrap();
        assert_eq!(completion.content.as_deref(), Some("hello"));
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
        assert_eq!(completion.usage.unwrap().total_tokens, Some(4));
    }

    #[test]
    fn api_error_body_is_an_error() {
        let body = json!({"error": {"message": "no credits"}}).to_string();
        assert!(matches!(
            parse_chat_response(&body),
            Err(SummarizationError::Api(msg)) if msg == "no credits"
        ));
    }

    #[test]
    fn no_choices_yields_empty_completion() {
        let completion = parse_chat_response("{}").unwrap();
        assert!(completion.content.is_none());
        assert!(matches!(
            parse_chat_response("not json"),
            Err(SummarizationError::InvalidPayload(_))
        ));
    }
}
