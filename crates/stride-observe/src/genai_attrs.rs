//! OpenTelemetry GenAI Semantic Convention attributes for LLM span
//! instrumentation.
//!
//! [`completion_span`] opens the span for one LLM completion with the
//! request-side attributes set and the response-side attributes empty;
//! [`record_completion`] fills the response side once the call lands.
//! The constants are the semconv field names, shared so every span and
//! `record` call across the workspace spells them identically.

// --- Attribute names ---

/// The name of the operation being performed (e.g., "chat", "dispatch_function").
pub const GEN_AI_OPERATION_NAME: &str = "gen_ai.operation.name";

/// The name of the GenAI provider that served the call (e.g., "anthropic").
pub const GEN_AI_PROVIDER_NAME: &str = "gen_ai.provider.name";

/// The model ID requested (e.g., "claude-sonnet-4-20250514").
pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";

/// The sampling temperature for the request.
pub const GEN_AI_REQUEST_TEMPERATURE: &str = "gen_ai.request.temperature";

/// The maximum number of output tokens requested.
pub const GEN_AI_REQUEST_MAX_TOKENS: &str = "gen_ai.request.max_tokens";

/// The number of input tokens consumed.
pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";

/// The number of output tokens generated.
pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";

/// The finish reason for the response (e.g., "end_turn", "max_tokens").
pub const GEN_AI_RESPONSE_FINISH_REASONS: &str = "gen_ai.response.finish_reasons";

/// The unique response/message ID from the provider.
pub const GEN_AI_RESPONSE_ID: &str = "gen_ai.response.id";

// --- Operation name values ---

/// Standard chat completion operation.
pub const OP_CHAT: &str = "chat";

/// Route classification for an incoming user turn.
pub const OP_ROUTE: &str = "route";

/// Dispatch of an AI-requested function call.
pub const OP_DISPATCH_FUNCTION: &str = "dispatch_function";

/// Persona system-prompt assembly.
pub const OP_BUILD_PROMPT: &str = "build_prompt";

/// Open the span for one LLM completion.
///
/// Request-side attributes are recorded immediately. Provider, response,
/// and usage attributes start empty and are filled by
/// [`record_completion`] once the call (or cache hit) resolves, since
/// failover can change the serving provider mid-call.
pub fn completion_span(
    operation: &'static str,
    model: &str,
    max_tokens: u32,
    temperature: Option<f64>,
) -> tracing::Span {
    tracing::info_span!(
        "gen_ai.completion",
        gen_ai.operation.name = operation,
        gen_ai.request.model = %model,
        gen_ai.request.max_tokens = max_tokens,
        gen_ai.request.temperature = ?temperature,
        gen_ai.provider.name = tracing::field::Empty,
        gen_ai.response.id = tracing::field::Empty,
        gen_ai.response.finish_reasons = tracing::field::Empty,
        gen_ai.usage.input_tokens = tracing::field::Empty,
        gen_ai.usage.output_tokens = tracing::field::Empty,
    )
}

/// Fill the response-side attributes on a [`completion_span`].
pub fn record_completion(
    span: &tracing::Span,
    provider: &str,
    response_id: &str,
    finish_reason: &str,
    input_tokens: u32,
    output_tokens: u32,
) {
    span.record(GEN_AI_PROVIDER_NAME, provider);
    span.record(GEN_AI_RESPONSE_ID, response_id);
    span.record(GEN_AI_RESPONSE_FINISH_REASONS, finish_reason);
    span.record(GEN_AI_USAGE_INPUT_TOKENS, input_tokens);
    span.record(GEN_AI_USAGE_OUTPUT_TOKENS, output_tokens);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_subscriber(f: impl FnOnce()) {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn test_completion_span_declares_every_semconv_field() {
        with_subscriber(|| {
            let span = completion_span(OP_CHAT, "claude-sonnet-4-20250514", 1024, Some(0.7));
            for field in [
                GEN_AI_OPERATION_NAME,
                GEN_AI_REQUEST_MODEL,
                GEN_AI_REQUEST_MAX_TOKENS,
                GEN_AI_REQUEST_TEMPERATURE,
                GEN_AI_PROVIDER_NAME,
                GEN_AI_RESPONSE_ID,
                GEN_AI_RESPONSE_FINISH_REASONS,
                GEN_AI_USAGE_INPUT_TOKENS,
                GEN_AI_USAGE_OUTPUT_TOKENS,
            ] {
                assert!(span.field(field).is_some(), "span missing {field}");
            }
        });
    }

    #[test]
    fn test_record_completion_fills_response_fields() {
        with_subscriber(|| {
            let span = completion_span(OP_CHAT, "gpt-4o-mini", 512, None);
            // All five record targets must hit fields declared by the span
            record_completion(&span, "openai", "resp-1", "end_turn", 120, 40);
        });
    }
}
