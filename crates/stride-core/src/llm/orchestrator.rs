//! Cache-fronted LLM orchestration facade.
//!
//! Every generation passes through the response cache: identical
//! requests (same chain, model, normalized prompt, parameters) are
//! deduplicated, and concurrent identical requests trigger exactly one
//! upstream call via the cache's single-flight guarantee. Provider
//! selection and failover live in [`FallbackChain`]; this layer adds
//! caching, cost/latency accounting, cancellation, and the typed
//! `ProviderExhausted` failure the caller can turn into a degraded-mode
//! message.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn, Instrument};

use stride_observe::genai_attrs;
use stride_types::cache::ResponseFingerprint;
use stride_types::error::OrchestratorError;
use stride_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, ProviderStatusInfo, TaskCategory, Usage,
};

use crate::cache::{CacheStore, ResponseCache};
use crate::request_context::RequestContext;

use super::fallback::FallbackChain;

/// What a generation produced, with accounting metadata.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub response: CompletionResponse,
    /// Provider that produced the response (original provider for cache hits).
    pub provider_name: String,
    /// Failover warning, when a non-primary provider handled a live call.
    pub failover_warning: Option<String>,
    /// Approximate upstream cost in USD. Zero for cache hits.
    pub estimated_cost: f64,
    /// Whether the response came from the cache.
    pub cached: bool,
    pub latency_ms: u64,
}

/// The payload stored in the response cache for one generation.
#[derive(Debug, Serialize, Deserialize)]
struct CachedGeneration {
    response: CompletionResponse,
    provider_name: String,
}

/// Metadata captured only when the compute closure actually ran.
struct LiveCallMeta {
    estimated_cost: f64,
    failover_warning: Option<String>,
}

/// Orchestrates LLM calls across providers with caching and accounting.
///
/// Constructed once per process and passed explicitly to consumers; the
/// fallback chain sits behind an async mutex because health tracking
/// mutates on every call.
pub struct LlmOrchestrator<S: CacheStore> {
    chain: Mutex<FallbackChain>,
    cache: ResponseCache<S>,
    default_ttl: Duration,
}

impl<S: CacheStore> LlmOrchestrator<S> {
    pub fn new(chain: FallbackChain, cache: ResponseCache<S>, default_ttl: Duration) -> Self {
        Self {
            chain: Mutex::new(chain),
            cache,
            default_ttl,
        }
    }

    /// Stable cache key for a request routed through this chain.
    ///
    /// The chain's primary provider name scopes the key, so reconfiguring
    /// the chain naturally misses old entries.
    async fn fingerprint(
        &self,
        request: &CompletionRequest,
        task: TaskCategory,
    ) -> ResponseFingerprint {
        let primary = self.chain.lock().await.primary_provider_name.clone();
        let prompt = match &request.system {
            Some(system) => format!("{system}\n{}", render_messages(request)),
            None => render_messages(request),
        };
        let params = format!(
            "max_tokens={};temperature={:?};stop={:?};task={task:?}",
            request.max_tokens, request.temperature, request.stop_sequences
        );
        ResponseFingerprint::compute(&primary, &request.model, &prompt, &params)
    }

    /// Generate a completion, consulting the cache first.
    ///
    /// `tags` attach to the cached entry for group invalidation (e.g. a
    /// persona version). Cancellation via the request context abandons
    /// the in-flight generation; nothing already persisted is rolled
    /// back.
    pub async fn generate(
        &self,
        request: &CompletionRequest,
        task: TaskCategory,
        tags: &[String],
        ctx: &RequestContext,
    ) -> Result<GenerationOutcome, OrchestratorError> {
        let start = Instant::now();
        let key = self.fingerprint(request, task).await;
        let attempts = self.chain.lock().await.providers.len();

        let span = genai_attrs::completion_span(
            genai_attrs::OP_CHAT,
            &request.model,
            request.max_tokens,
            request.temperature,
        );

        // Populated inside the compute closure, so its presence afterward
        // tells us exactly whether this call hit the cache or the chain.
        let live_meta: std::sync::Mutex<Option<LiveCallMeta>> = std::sync::Mutex::new(None);

        let generation = tokio::select! {
            _ = ctx.cancellation.cancelled() => {
                return Err(OrchestratorError::Cancelled);
            }
            result = self.cache.get_or_compute::<CachedGeneration, _, _, _>(
                key.as_str(),
                self.default_ttl,
                tags,
                || async {
                    let mut chain = self.chain.lock().await;
                    let result = chain.complete(request, task).await?;
                    let estimated_cost =
                        estimate_call_cost(&chain, &result.provider_name, &result.response.usage);
                    *live_meta.lock().expect("live_meta lock poisoned") = Some(LiveCallMeta {
                        estimated_cost,
                        failover_warning: result.failover_warning.clone(),
                    });
                    Ok::<_, LlmError>(CachedGeneration {
                        response: result.response,
                        provider_name: result.provider_name,
                    })
                },
            ).instrument(span.clone()) => result,
        };

        let latency_ms = start.elapsed().as_millis() as u64;

        match generation {
            Ok(cached) => {
                let meta = live_meta.lock().expect("live_meta lock poisoned").take();
                let (estimated_cost, failover_warning, was_cached) = match meta {
                    Some(meta) => (meta.estimated_cost, meta.failover_warning, false),
                    None => (0.0, None, true),
                };

                genai_attrs::record_completion(
                    &span,
                    &cached.provider_name,
                    &cached.response.id,
                    &cached.response.stop_reason.to_string(),
                    cached.response.usage.input_tokens,
                    cached.response.usage.output_tokens,
                );
                info!(
                    provider = %cached.provider_name,
                    model = %cached.response.model,
                    input_tokens = cached.response.usage.input_tokens,
                    output_tokens = cached.response.usage.output_tokens,
                    cost_usd = estimated_cost,
                    latency_ms,
                    cached = was_cached,
                    "LLM generation complete"
                );

                Ok(GenerationOutcome {
                    response: cached.response,
                    provider_name: cached.provider_name,
                    failover_warning,
                    estimated_cost,
                    cached: was_cached,
                    latency_ms,
                })
            }
            Err(e) => {
                warn!(error = %e, "LLM generation failed across all providers");
                Err(OrchestratorError::ProviderExhausted {
                    attempts,
                    last_error: e.to_string(),
                })
            }
        }
    }

    /// Health status of every provider in the chain.
    pub async fn provider_status(&self) -> Vec<ProviderStatusInfo> {
        self.chain.lock().await.health_status()
    }

    /// Purge all cached responses carrying the given tag.
    pub async fn invalidate_cached_responses(&self, tag: &str) -> u64 {
        match self.cache.invalidate_tag(tag).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(tag, error = %e, "Cache tag invalidation failed");
                0
            }
        }
    }
}

fn estimate_call_cost(chain: &FallbackChain, provider_name: &str, usage: &Usage) -> f64 {
    chain
        .cost_table
        .get(provider_name)
        .map(|cost| {
            (f64::from(usage.input_tokens) / 1_000_000.0) * cost.input_cost_per_million
                + (f64::from(usage.output_tokens) / 1_000_000.0) * cost.output_cost_per_million
        })
        .unwrap_or(0.0)
}

fn render_messages(request: &CompletionRequest) -> String {
    request
        .messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
