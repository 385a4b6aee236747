//! AnthropicProvider -- concrete [`LlmProvider`] implementation for Anthropic Claude.
//!
//! Sends requests to the Anthropic Messages API (`/v1/messages`) with
//! proper authentication headers. The upstream surface of this core is
//! request/response, so `stream` is a single-shot adapter over the
//! non-streaming call: one completion, replayed as stream events.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use std::pin::Pin;
use std::time::Duration;

use futures_util::Stream;
use secrecy::{ExposeSecret, SecretString};

use stride_core::llm::provider::LlmProvider;
use stride_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities, StopReason, StreamEvent,
    TokenCount, Usage,
};

use super::types::{AnthropicContentBlock, AnthropicMessage, AnthropicNonStreamResponse, AnthropicRequest};

/// Anthropic Claude LLM provider.
///
/// Implements [`LlmProvider`] for the Anthropic Messages API.
///
/// # API Key Security
///
/// The API key is stored as a [`SecretString`] and is only exposed when
/// constructing HTTP request headers. It never appears in Debug output,
/// Display output, or tracing logs.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    capabilities: ProviderCapabilities,
}

impl AnthropicProvider {
    /// The Anthropic API version header value.
    const API_VERSION: &'static str = "2023-06-01";

    /// Create a new Anthropic provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Anthropic API key wrapped in SecretString
    /// * `model` - Model identifier (e.g., "claude-sonnet-4-20250514")
    pub fn new(api_key: SecretString, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300)) // 5 min timeout for long generations
            .build()
            .expect("failed to create reqwest client");

        let capabilities = Self::capabilities_for_model(&model);

        Self {
            client,
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            model,
            capabilities,
        }
    }

    /// The default model for this provider.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Override the base URL (useful for testing or proxies).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Determine capabilities based on model name.
    fn capabilities_for_model(model: &str) -> ProviderCapabilities {
        if model.contains("sonnet") {
            ProviderCapabilities {
                max_context_tokens: 200_000,
                max_output_tokens: 8_192,
                streaming: true,
                tool_calling: true,
            }
        } else if model.contains("opus") {
            ProviderCapabilities {
                max_context_tokens: 200_000,
                max_output_tokens: 32_000,
                streaming: true,
                tool_calling: true,
            }
        } else if model.contains("haiku") {
            ProviderCapabilities {
                max_context_tokens: 200_000,
                max_output_tokens: 8_192,
                streaming: true,
                tool_calling: true,
            }
        } else {
            // Conservative defaults for unknown models
            ProviderCapabilities {
                max_context_tokens: 200_000,
                max_output_tokens: 4_096,
                streaming: true,
                tool_calling: true,
            }
        }
    }

    /// Build the full API URL for a given path.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Convert a generic [`CompletionRequest`] into an [`AnthropicRequest`].
    fn to_anthropic_request(&self, request: &CompletionRequest) -> AnthropicRequest {
        let messages = request
            .messages
            .iter()
            .map(|m| AnthropicMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect();

        AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            messages,
            system: request.system.clone(),
            stream: false,
            temperature: request.temperature,
            stop_sequences: request.stop_sequences.clone(),
        }
    }
}

/// Send one Messages API request and map the response.
///
/// Free function so the stream adapter can own everything it needs
/// without borrowing the provider.
async fn send_request(
    client: reqwest::Client,
    url: String,
    api_key: SecretString,
    body: AnthropicRequest,
) -> Result<CompletionResponse, LlmError> {
    let response = client
        .post(&url)
        .header("x-api-key", api_key.expose_secret())
        .header("anthropic-version", AnthropicProvider::API_VERSION)
        .header("content-type", "application/json")
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
            529 => LlmError::Overloaded(error_body),
            _ => LlmError::Provider {
                message: format!("HTTP {status}: {error_body}"),
            },
        });
    }

    let anthropic_resp: AnthropicNonStreamResponse = response
        .json()
        .await
        .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;

    // Extract text content from the response
    let content = anthropic_resp
        .content
        .iter()
        .filter_map(|block| match block {
            AnthropicContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");

    let stop_reason = match anthropic_resp.stop_reason.as_deref() {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    };

    Ok(CompletionResponse {
        id: anthropic_resp.id,
        content,
        model: anthropic_resp.model,
        stop_reason,
        usage: Usage {
            input_tokens: anthropic_resp.usage.input_tokens,
            output_tokens: anthropic_resp.usage.output_tokens,
        },
    })
}

// AnthropicProvider intentionally does NOT derive Debug to prevent
// accidental exposure of internal state. The SecretString field ensures
// the API key is never printed, but we also omit Debug entirely.

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        send_request(
            self.client.clone(),
            self.url("/v1/messages"),
            self.api_key.clone(),
            self.to_anthropic_request(request),
        )
        .await
    }

    fn stream(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        let client = self.client.clone();
        let url = self.url("/v1/messages");
        let api_key = self.api_key.clone();
        let body = self.to_anthropic_request(&request);

        // Single-shot adapter: one completion, replayed as stream events
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
        // Simple estimation: ~4 chars per token (rough average for English text)
        let mut total_chars: usize = 0;

        if let Some(system) = &request.system {
            total_chars += system.len();
        }

        for msg in &request.messages {
            total_chars += msg.content.len();
            // Add overhead for role and message structure
            total_chars += 10;
        }

        let estimated_tokens = (total_chars as f64 / 4.0).ceil() as u32;

        Ok(TokenCount {
            input_tokens: estimated_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stride_types::llm::{ChatMessage, MessageRole};

    fn make_provider() -> AnthropicProvider {
        AnthropicProvider::new(
            SecretString::from("test-key-not-real"),
            "claude-sonnet-4-20250514".to_string(),
        )
    }

    #[test]
    fn test_provider_name() {
        let provider = make_provider();
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn test_sonnet_capabilities() {
        let provider = make_provider();
        let caps = provider.capabilities();
        assert_eq!(caps.max_context_tokens, 200_000);
        assert_eq!(caps.max_output_tokens, 8_192);
        assert!(caps.streaming);
        assert!(caps.tool_calling);
    }

    #[test]
    fn test_opus_capabilities() {
        let provider = AnthropicProvider::new(
            SecretString::from("test-key"),
            "claude-opus-4-20250514".to_string(),
        );
        assert_eq!(provider.capabilities().max_output_tokens, 32_000);
    }

    #[test]
    fn test_unknown_model_conservative_defaults() {
        let provider =
            AnthropicProvider::new(SecretString::from("test-key"), "mystery-model".to_string());
        assert_eq!(provider.capabilities().max_output_tokens, 4_096);
    }

    #[test]
    fn test_to_anthropic_request() {
        let provider = make_provider();
        let request = CompletionRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            messages: vec![ChatMessage {
                role: MessageRole::User,
                content: "Hello".to_string(),
            }],
            system: Some("Be helpful".to_string()),
            max_tokens: 1024,
            temperature: Some(0.7),
            stream: false,
            stop_sequences: None,
        };

        let anthropic_req = provider.to_anthropic_request(&request);
        assert_eq!(anthropic_req.model, "claude-sonnet-4-20250514");
        assert_eq!(anthropic_req.messages.len(), 1);
        assert_eq!(anthropic_req.messages[0].role, "user");
        assert_eq!(anthropic_req.system.as_deref(), Some("Be helpful"));
    }

    #[test]
    fn test_base_url_override() {
        let provider = make_provider().with_base_url("http://localhost:8080".to_string());
        assert_eq!(provider.url("/v1/messages"), "http://localhost:8080/v1/messages");
    }

    #[tokio::test]
    async fn test_count_tokens_estimation() {
        let provider = make_provider();
        let request = CompletionRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            messages: vec![ChatMessage {
                role: MessageRole::User,
                content: "Hello world, how are you doing today?".to_string(),
            }],
            system: Some("You are helpful.".to_string()),
            max_tokens: 1024,
            temperature: None,
            stream: false,
            stop_sequences: None,
        };

        let count = provider.count_tokens(&request).await.unwrap();
        assert!(count.input_tokens > 0);
        assert!(count.input_tokens < 100);
    }
}
