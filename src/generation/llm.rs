//! Provider-agnostic LLM client.
//!
//! Providers register a transport adapter per [`ProviderKind`]; selecting a
//! provider with no registered adapter fails fast with a configuration
//! error. The service retries transport-level failures (HTTP 429/5xx and
//! transient network errors) with exponential backoff up to a hard cap,
//! applies a per-request timeout, and emits a usage observation for every
//! completed call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::core::config::{Credentials, ProviderKind};
use crate::core::errors::{Result, TestMindError};

/// One generation request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Provider to route to
    pub provider: ProviderKind,
    /// Model id
    pub model: String,
    /// System prompt, when the provider supports one
    pub system: Option<String>,
    /// User prompt
    pub prompt: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Completion token cap
    pub max_tokens: usize,
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub prompt: usize,
    /// Completion tokens
    pub completion: usize,
    /// Total tokens
    pub total: usize,
}

/// One generation response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Generated text
    pub content: String,
    /// Token usage
    pub usage: TokenUsage,
    /// Provider finish reason (`stop`, `length`, ...)
    pub finish_reason: String,
}

/// Transport-level failure classification used by the retry loop.
#[derive(Debug)]
enum TransportError {
    /// Retryable: 429/5xx or transient network failure
    Retryable(String),
    /// Fatal: 4xx other than 429, malformed response, bad credentials
    Fatal(TestMindError),
}

/// Provider transport contract.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Perform one generation call without retries.
    async fn generate_once(&self, request: &LlmRequest)
        -> std::result::Result<LlmResponse, TestMindError>;
}

/// Accumulated usage across a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Calls completed
    pub calls: u64,
    /// Prompt tokens spent
    pub prompt_tokens: usize,
    /// Completion tokens spent
    pub completion_tokens: usize,
    /// Estimated USD cost at catalog rates
    pub estimated_cost: f64,
}

/// Session usage accumulator shared by the service and the CLI.
#[derive(Debug, Default)]
pub struct UsageTracker {
    totals: Mutex<UsageTotals>,
}

impl UsageTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed call.
    pub fn record(&self, model: &str, usage: TokenUsage) {
        let cost = crate::core::tokens::TokenBudgetManager::new().estimate_cost(
            model,
            usage.prompt,
            usage.completion,
        );
        let mut totals = self.totals.lock();
        totals.calls += 1;
        totals.prompt_tokens += usage.prompt;
        totals.completion_tokens += usage.completion;
        totals.estimated_cost += cost;
    }

    /// Current totals.
    pub fn totals(&self) -> UsageTotals {
        self.totals.lock().clone()
    }
}

/// Retry/timeout policy for the service.
#[derive(Debug, Clone)]
pub struct LlmRetryPolicy {
    /// Hard cap on attempts
    pub max_attempts: u32,
    /// Base backoff delay
    pub base_delay: Duration,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for LlmRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Provider-agnostic LLM service.
pub struct LlmService {
    transports: HashMap<ProviderKind, Box<dyn ProviderTransport>>,
    retry: LlmRetryPolicy,
    usage: Arc<UsageTracker>,
}

impl LlmService {
    /// Create an empty service (no providers registered).
    pub fn new(retry: LlmRetryPolicy, usage: Arc<UsageTracker>) -> Self {
        Self {
            transports: HashMap::new(),
            retry,
            usage,
        }
    }

    /// Create a service with every provider the credentials allow.
    pub fn from_credentials(
        credentials: &Credentials,
        api_base: Option<&str>,
        retry: LlmRetryPolicy,
        usage: Arc<UsageTracker>,
    ) -> Self {
        let mut service = Self::new(retry, usage);

        if let Some(key) = credentials.for_provider(ProviderKind::OpenaiCompatible) {
            let base = api_base.unwrap_or("https://api.openai.com/v1");
            service.register(
                ProviderKind::OpenaiCompatible,
                Box::new(OpenAiCompatibleTransport::new(base, Some(key.to_string()))),
            );
        }
        if let Some(key) = credentials.for_provider(ProviderKind::Anthropic) {
            let base = api_base.unwrap_or("https://api.anthropic.com");
            service.register(
                ProviderKind::Anthropic,
                Box::new(AnthropicTransport::new(base, key.to_string())),
            );
        }
        if let Some(base) = api_base {
            // A local endpoint needs no credential.
            service.register(
                ProviderKind::LocalHttp,
                Box::new(OpenAiCompatibleTransport::new(base, None)),
            );
        }

        service
    }

    /// Register (or replace) a transport for a provider.
    pub fn register(&mut self, provider: ProviderKind, transport: Box<dyn ProviderTransport>) {
        self.transports.insert(provider, transport);
    }

    /// Providers with a registered transport.
    pub fn registered_providers(&self) -> Vec<ProviderKind> {
        self.transports.keys().copied().collect()
    }

    /// Session usage totals.
    pub fn usage(&self) -> UsageTotals {
        self.usage.totals()
    }

    /// Generate with retries, timeout, and usage accounting.
    pub async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let transport = self.transports.get(&request.provider).ok_or_else(|| {
            TestMindError::config_field(
                format!(
                    "no transport registered for provider '{}'",
                    request.provider.as_str()
                ),
                "llm_provider",
            )
        })?;

        let mut attempt = 0;
        loop {
            attempt += 1;

            let outcome = tokio::time::timeout(
                self.retry.request_timeout,
                transport.generate_once(request),
            )
            .await;

            let classified = match outcome {
                Err(_) => TransportError::Retryable("request timed out".to_string()),
                Ok(Ok(response)) => {
                    self.usage.record(&request.model, response.usage);
                    debug!(
                        model = %request.model,
                        prompt_tokens = response.usage.prompt,
                        completion_tokens = response.usage.completion,
                        finish = %response.finish_reason,
                        "llm call completed"
                    );
                    return Ok(response);
                }
                Ok(Err(err)) => classify(err),
            };

            match classified {
                TransportError::Fatal(err) => return Err(err),
                TransportError::Retryable(message) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %message,
                        "llm call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                TransportError::Retryable(message) => {
                    return Err(TestMindError::generation_stage(
                        format!("transport failed after {attempt} attempts: {message}"),
                        "transport",
                    ));
                }
            }
        }
    }
}

/// Split an error into retryable and fatal halves.
fn classify(err: TestMindError) -> TransportError {
    match &err {
        TestMindError::Generation { message, .. }
            if message.contains("429")
                || message.contains("500")
                || message.contains("502")
                || message.contains("503")
                || message.contains("529")
                || message.contains("connection")
                || message.contains("timed out") =>
        {
            TransportError::Retryable(message.clone())
        }
        _ => TransportError::Fatal(err),
    }
}

fn status_error(status: reqwest::StatusCode, body: &str) -> TestMindError {
    TestMindError::Generation {
        message: format!("provider returned {status}: {}", truncate(body, 200)),
        stage: Some("transport".to_string()),
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// OpenAI-compatible chat-completions transport (also serves local
/// inference servers that speak the same protocol).
pub struct OpenAiCompatibleTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleTransport {
    /// Create a transport against a base URL (no `/chat/completions`
    /// suffix).
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}

#[async_trait]
impl ProviderTransport for OpenAiCompatibleTransport {
    async fn generate_once(
        &self,
        request: &LlmRequest,
    ) -> std::result::Result<LlmResponse, TestMindError> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&json!({
                "model": request.model,
                "messages": messages,
                "temperature": request.temperature,
                "max_tokens": request.max_tokens,
            }));
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            TestMindError::generation_stage("provider returned no choices", "transport")
        })?;
        let usage = parsed.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt: u.prompt_tokens,
            completion: u.completion_tokens,
            total: u.total_tokens,
        });

        Ok(LlmResponse {
            content: choice.message.content,
            usage,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        })
    }
}

/// Anthropic messages transport.
pub struct AnthropicTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicTransport {
    /// Create a transport against an Anthropic-style base URL.
    pub fn new(base_url: impl Into<String>, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

#[async_trait]
impl ProviderTransport for AnthropicTransport {
    async fn generate_once(
        &self,
        request: &LlmRequest,
    ) -> std::result::Result<LlmResponse, TestMindError> {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let parsed: AnthropicResponse = response.json().await?;
        let content = parsed
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");
        let usage = parsed.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt: u.input_tokens,
            completion: u.output_tokens,
            total: u.input_tokens + u.output_tokens,
        });

        Ok(LlmResponse {
            content,
            usage,
            finish_reason: parsed.stop_reason.unwrap_or_else(|| "end_turn".to_string()),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport used across the generation test suites.

    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted transport: pops canned outcomes in order, repeating the
    /// last one forever.
    pub struct ScriptedTransport {
        responses: Vec<std::result::Result<String, String>>,
        cursor: AtomicU32,
        pub calls: AtomicU32,
    }

    impl ScriptedTransport {
        pub fn new(responses: Vec<std::result::Result<String, String>>) -> Self {
            Self {
                responses,
                cursor: AtomicU32::new(0),
                calls: AtomicU32::new(0),
            }
        }

        pub fn always(content: &str) -> Self {
            Self::new(vec![Ok(content.to_string())])
        }
    }

    #[async_trait]
    impl ProviderTransport for ScriptedTransport {
        async fn generate_once(
            &self,
            request: &LlmRequest,
        ) -> std::result::Result<LlmResponse, TestMindError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let index = self.cursor.fetch_add(1, Ordering::SeqCst) as usize;
            let scripted = self
                .responses
                .get(index)
                .or_else(|| self.responses.last())
                .cloned()
                .unwrap_or_else(|| Ok(String::new()));

            match scripted {
                Ok(content) => Ok(LlmResponse {
                    content,
                    usage: TokenUsage {
                        prompt: request.prompt.len() / 4,
                        completion: 100,
                        total: request.prompt.len() / 4 + 100,
                    },
                    finish_reason: "stop".to_string(),
                }),
                Err(message) => Err(TestMindError::Generation {
                    message,
                    stage: Some("transport".to_string()),
                }),
            }
        }
    }
}
