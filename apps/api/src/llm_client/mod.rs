/// LLM Client: the single point of entry for all chat-completion calls.
///
/// ARCHITECTURAL RULE: stage executors never talk to the provider directly.
/// Everything goes through a `ChatModel`, so tests can swap in a scripted model.
///
/// No retries here: a failed call is surfaced to the caller as-is.
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod prompts;

const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid JSON response from LLM: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,
}

impl LlmError {
    /// 401/403 from the provider: the credential is bad or revoked.
    pub fn is_auth(&self) -> bool {
        matches!(self, LlmError::Api { status: 401 | 403, .. })
    }

    /// 429 from the provider: rate limit or exhausted quota.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::Api { status: 429, .. })
    }

    /// The provider answered, but not with the JSON we asked for.
    pub fn is_malformed_output(&self) -> bool {
        matches!(self, LlmError::Parse(_) | LlmError::EmptyContent)
    }
}

/// One system + user exchange, sent with a per-job credential.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub api_key: &'a str,
    pub system: &'a str,
    pub prompt: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Per-job token accounting, summed across every stage call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn add(&mut self, usage: &Usage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub usage: Usage,
}

impl LlmResponse {
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Anything that can answer a chat request. Carried in `AppState` as `Arc<dyn ChatModel>`.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model name reported in token usage.
    fn model(&self) -> &str;

    async fn complete(&self, request: ChatRequest<'_>) -> Result<LlmResponse, LlmError>;
}

/// Calls the model once and deserializes the text response as JSON.
/// Returns the parsed value together with the call's token usage.
pub async fn call_json<T: DeserializeOwned>(
    model: &dyn ChatModel,
    request: ChatRequest<'_>,
) -> Result<(T, Usage), LlmError> {
    let response = model.complete(request).await?;
    let text = response.text().ok_or(LlmError::EmptyContent)?;

    // Strip markdown code fences if the model wraps JSON in them
    let text = strip_json_fences(text);

    let value = serde_json::from_str(text)?;
    Ok((value, response.usage))
}

// ────────────────────────────────────────────────────────────────────────────
// OpenAI-compatible Chat Completions client
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [CompletionMessage<'a>; 2],
    max_completion_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    error: ProviderErrorBody,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    message: String,
}

/// HTTP client for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl LlmClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()?,
            base_url: base_url.into(),
            model: model.into(),
            max_tokens,
            temperature,
        })
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: ChatRequest<'_>) -> Result<LlmResponse, LlmError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: [
                CompletionMessage {
                    role: "system",
                    content: request.system,
                },
                CompletionMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            max_completion_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(request.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ProviderError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Read as text first so a garbled success body is a parse error, not a transport error
        let raw = response.text().await?;
        let parsed: CompletionResponse = serde_json::from_str(&raw)?;

        debug!(
            "LLM call succeeded: prompt_tokens={}, completion_tokens={}",
            parsed.usage.prompt_tokens, parsed.usage.completion_tokens
        );

        Ok(LlmResponse {
            content: parsed.choices.into_iter().next().and_then(|c| c.message.content),
            usage: parsed.usage,
        })
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted `ChatModel` for pipeline tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    pub enum Scripted {
        Text(String),
        Status(u16, String),
    }

    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Scripted>>,
        prompts: Mutex<Vec<String>>,
        keys: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<Scripted>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
                keys: Mutex::new(Vec::new()),
            }
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }

        pub fn keys(&self) -> Vec<String> {
            self.keys.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model(&self) -> &str {
            "test-model"
        }

        async fn complete(&self, request: ChatRequest<'_>) -> Result<LlmResponse, LlmError> {
            self.prompts.lock().unwrap().push(request.prompt.to_string());
            self.keys.lock().unwrap().push(request.api_key.to_string());
            match self.replies.lock().unwrap().pop_front() {
                Some(Scripted::Text(text)) => Ok(LlmResponse {
                    content: Some(text),
                    usage: Usage {
                        prompt_tokens: 100,
                        completion_tokens: 50,
                        total_tokens: 150,
                    },
                }),
                Some(Scripted::Status(status, message)) => Err(LlmError::Api { status, message }),
                None => Err(LlmError::EmptyContent),
            }
        }
    }
}
