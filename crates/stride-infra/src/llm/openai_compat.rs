//! OpenAI-compatible LLM provider implementation.
//!
//! A single [`OpenAiCompatProvider`] serves any backend speaking the
//! `/v1/chat/completions` dialect (OpenAI, Groq, local gateways) via a
//! configurable base URL, sharing the same plain-reqwest HTTP idiom as
//! the Anthropic client.
//!
//! # API Key Security
//!
//! Does NOT derive Debug to prevent accidental exposure of the API key.
//! Same defense pattern as [`super::anthropic::AnthropicProvider`].

use std::pin::Pin;
use std::time::Duration;

use futures_util::Stream;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use stride_core::llm::provider::LlmProvider;
use stride_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, MessageRole, ProviderCapabilities, StopReason,
    StreamEvent, TokenCount, Usage,
};

/// Request body for the chat completions endpoint.
#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    id: String,
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Provider for any OpenAI-compatible chat completions API.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    provider_name: String,
    model: String,
    capabilities: ProviderCapabilities,
}

impl OpenAiCompatProvider {
    /// Create a provider for an arbitrary OpenAI-compatible backend.
    pub fn new(
        provider_name: impl Into<String>,
        api_key: SecretString,
        base_url: impl Into<String>,
        model: impl Into<String>,
        capabilities: ProviderCapabilities,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("failed to create reqwest client");

        Self {
            client,
            api_key,
            base_url: base_url.into(),
            provider_name: provider_name.into(),
            model: model.into(),
            capabilities,
        }
    }

    /// Create an OpenAI provider (`https://api.openai.com/v1`).
    pub fn openai(api_key: SecretString, model: impl Into<String>) -> Self {
        Self::new(
            "openai",
            api_key,
            "https://api.openai.com/v1",
            model,
            ProviderCapabilities {
                streaming: true,
                tool_calling: true,
                max_context_tokens: 128_000,
                max_output_tokens: 16_384,
            },
        )
    }

    /// Create a Groq provider (`https://api.groq.com/openai/v1`).
    pub fn groq(api_key: SecretString, model: impl Into<String>) -> Self {
        Self::new(
            "groq",
            api_key,
            "https://api.groq.com/openai/v1",
            model,
            ProviderCapabilities {
                streaming: true,
                tool_calling: true,
                max_context_tokens: 128_000,
                max_output_tokens: 8_192,
            },
        )
    }

    /// The default model for this provider.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_body(&self, request: &CompletionRequest) -> ChatCompletionsRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        // The chat completions dialect carries the system prompt as the
        // first message rather than a dedicated field
        if let Some(ref system) = request.system {
            messages.push(WireMessage {
                role: MessageRole::System.to_string(),
                content: system.clone(),
            });
        }
        for m in &request.messages {
            messages.push(WireMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            });
        }

        ChatCompletionsRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop: request.stop_sequences.clone(),
            stream: false,
        }
    }
}

/// Send one chat completions request and map the response.
async fn send_request(
    client: reqwest::Client,
    url: String,
    api_key: SecretString,
    body: ChatCompletionsRequest,
) -> Result<CompletionResponse, LlmError> {
    let response = client
        .post(&url)
        .bearer_auth(api_key.expose_secret())
        .json(&body)
        .send()
        .await
        .map_err(|e| LlmError::Provider {
            message: format!("HTTP request failed: {e}"),
        })?;

    let status = response.status();
    if !status.is_success() {
        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000);
        let error_body = response.text().await.unwrap_or_default();
        return Err(match status.as_u16() {
            401 => LlmError::AuthenticationFailed,
            429 => LlmError::RateLimited { retry_after_ms },
            503 => LlmError::Overloaded(error_body),
            _ => LlmError::Provider {
                message: format!("HTTP {status}: {error_body}"),
            },
        });
    }

    let parsed: ChatCompletionsResponse = response
        .json()
        .await
        .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Deserialization("response had no choices".to_string()))?;

    let stop_reason = match choice.finish_reason.as_deref() {
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };

    Ok(CompletionResponse {
        id: parsed.id,
        content: choice.message.content.unwrap_or_default(),
        model: parsed.model,
        stop_reason,
        usage: Usage {
            input_tokens: parsed.usage.prompt_tokens,
            output_tokens: parsed.usage.completion_tokens,
        },
    })
}

impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        send_request(
            self.client.clone(),
            self.url(),
            self.api_key.clone(),
            self.build_body(request),
        )
        .await
    }

    fn stream(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        let client = self.client.clone();
        let url = self.url();
        let api_key = self.api_key.clone();
        let body = self.build_body(&request);

        // Single-shot adapter, same shape as the Anthropic client
        Box::pin(async_stream::stream! {
            yield Ok(StreamEvent::Connected);
            match send_request(client, url, api_key, body).await {
                Ok(response) => {
                    yield Ok(StreamEvent::TextDelta {
                        text: response.content,
                    });
                    yield Ok(StreamEvent::Usage(response.usage));
                    yield Ok(StreamEvent::MessageDelta {
                        stop_reason: response.stop_reason,
                    });
                    yield Ok(StreamEvent::Done);
                }
                Err(e) => {
                    yield Err(e);
                }
            }
        })
    }

    async fn count_tokens(&self, request: &CompletionRequest) -> Result<TokenCount, LlmError> {
        let mut total_chars: usize = 0;
        if let Some(system) = &request.system {
            total_chars += system.len();
        }
        for msg in &request.messages {
            total_chars += msg.content.len() + 10;
        }
        Ok(TokenCount {
            input_tokens: (total_chars as f64 / 4.0).ceil() as u32,
        })
    }
}
