//! Multi-provider fallback chain.
//!
//! Routes LLM requests through multiple providers with automatic failover.
//! Providers are tried in selection order. Transient errors (provider down,
//! rate limited, overloaded, timed out) trigger failover; auth/config
//! errors do not. Every provider call carries an explicit timeout; a
//! timeout counts as a retryable failure.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::{Duration, Instant};

use futures_util::Stream;

use stride_types::llm::{
    CompletionRequest, CompletionResponse, FallbackChainConfig, LlmError, ProviderCostInfo,
    ProviderStatusInfo, StreamEvent, TaskCategory,
};

use super::box_provider::BoxLlmProvider;
use super::health::ProviderHealth;

/// Result of a successful completion through the fallback chain.
#[derive(Debug)]
pub struct FallbackResult {
    /// The completion response from the provider.
    pub response: CompletionResponse,
    /// Name of the provider that handled the request.
    pub provider_name: String,
    /// Failover warning message, if the request was handled by a non-primary provider.
    pub failover_warning: Option<String>,
}

/// Result of selecting a provider for streaming.
pub struct StreamSelection {
    /// The stream of events from the selected provider.
    pub stream: Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>,
    /// Name of the provider that is streaming.
    pub provider_name: String,
    /// Failover warning message, if streaming from a non-primary provider.
    pub failover_warning: Option<String>,
}

impl std::fmt::Debug for StreamSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSelection")
            .field("provider_name", &self.provider_name)
            .field("failover_warning", &self.failover_warning)
            .field("stream", &"<stream>")
            .finish()
    }
}

/// Routes LLM requests through multiple providers with automatic failover.
///
/// Selection order depends on the task category: parsing tasks try the
/// cheapest capable provider first, open conversation follows configured
/// priority. Circuit breaker state and rate limits gate availability.
pub struct FallbackChain {
    /// Provider health trackers paired with their boxed provider instances.
    pub providers: Vec<(ProviderHealth, BoxLlmProvider)>,
    /// Cost information keyed by provider name.
    pub cost_table: HashMap<String, ProviderCostInfo>,
    /// Name of the primary (highest priority) provider.
    pub primary_provider_name: String,
    /// Per-provider-call timeout.
    pub request_timeout: Duration,
    /// Maximum time (ms) to wait in rate-limit queue before failing over.
    pub rate_limit_queue_timeout_ms: u64,
    /// Warn if fallback provider costs more than this multiplier of the primary.
    pub cost_warning_multiplier: f64,
    /// Skip providers whose blended per-million cost exceeds this ceiling,
    /// unless that would leave no candidates.
    pub cost_ceiling_per_million: Option<f64>,
}

impl FallbackChain {
    /// Create a new fallback chain from configuration and provider instances.
    pub fn new(
        config: FallbackChainConfig,
        providers: Vec<BoxLlmProvider>,
        cost_table: HashMap<String, ProviderCostInfo>,
    ) -> Self {
        let primary_provider_name = config
            .providers
            .iter()
            .min_by_key(|p| p.priority)
            .map(|p| p.name.clone())
            .unwrap_or_default();

        let health_providers = config
            .providers
            .iter()
            .zip(providers)
            .map(|(cfg, provider)| {
                let health = ProviderHealth::new(&cfg.name, cfg.priority);
                (health, provider)
            })
            .collect();

        Self {
            providers: health_providers,
            cost_table,
            primary_provider_name,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            rate_limit_queue_timeout_ms: config.rate_limit_queue_timeout_ms,
            cost_warning_multiplier: config.cost_warning_multiplier,
            cost_ceiling_per_million: None,
        }
    }

    /// Set a per-request cost ceiling (USD per million tokens, blended).
    pub fn with_cost_ceiling(mut self, ceiling: Option<f64>) -> Self {
        self.cost_ceiling_per_million = ceiling;
        self
    }

    /// Get health status of all providers.
    pub fn health_status(&self) -> Vec<ProviderStatusInfo> {
        self.providers
            .iter()
            .map(|(health, _)| health.to_status_info())
            .collect()
    }

    /// Check if the primary (highest priority) provider is currently available.
    ///
    /// When the primary recovers, the next conversation request naturally
    /// routes back to it since it sorts first.
    pub fn primary_available(&mut self) -> bool {
        for (health, _) in &mut self.providers {
            if health.name == self.primary_provider_name {
                return health.is_available();
            }
        }
        false
    }

    /// Blended per-million cost for a provider, if known.
    fn blended_cost(&self, name: &str) -> Option<f64> {
        self.cost_table.get(name).map(ProviderCostInfo::blended_cost)
    }

    /// Build selection-ordered indices for the given task category.
    ///
    /// `Conversation` sorts by priority (ascending), ties broken by
    /// recent error rate (healthiest first), then last latency, then
    /// name. `Parsing` sorts by blended cost (cheapest first, unknown
    /// cost last), then priority. A configured cost ceiling filters
    /// candidates first, falling back to the unfiltered list when the
    /// filter would leave nothing to try.
    fn sorted_indices(&self, task: TaskCategory) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.providers.len()).collect();

        if let Some(ceiling) = self.cost_ceiling_per_million {
            let within: Vec<usize> = indices
                .iter()
                .copied()
                .filter(|&i| {
                    self.blended_cost(&self.providers[i].0.name)
                        .is_none_or(|c| c <= ceiling)
                })
                .collect();
            if !within.is_empty() {
                indices = within;
            }
        }

        match task {
            TaskCategory::Conversation => {
                indices.sort_by(|&a, &b| {
                    let ha = &self.providers[a].0;
                    let hb = &self.providers[b].0;
                    ha.priority
                        .cmp(&hb.priority)
                        .then_with(|| error_bucket(ha).cmp(&error_bucket(hb)))
                        .then_with(|| {
                            let la = ha.last_latency_ms().unwrap_or(u64::MAX);
                            let lb = hb.last_latency_ms().unwrap_or(u64::MAX);
                            la.cmp(&lb)
                        })
                        .then_with(|| ha.name.cmp(&hb.name))
                });
            }
            TaskCategory::Parsing => {
                indices.sort_by(|&a, &b| {
                    let ha = &self.providers[a].0;
                    let hb = &self.providers[b].0;
                    let ca = self.blended_cost(&ha.name).unwrap_or(f64::MAX);
                    let cb = self.blended_cost(&hb.name).unwrap_or(f64::MAX);
                    ca.partial_cmp(&cb)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| ha.priority.cmp(&hb.priority))
                        .then_with(|| ha.name.cmp(&hb.name))
                });
            }
        }
        indices
    }

    /// Build a failover warning string when a non-primary provider handles the request.
    fn build_failover_warning(&self, used_provider: &str) -> Option<String> {
        if used_provider == self.primary_provider_name {
            return None;
        }

        let mut parts = vec![format!("Switched to {used_provider}")];

        // Check capability downgrade
        let primary_caps = self
            .providers
            .iter()
            .find(|(h, _)| h.name == self.primary_provider_name);
        let used_caps = self
            .providers
            .iter()
            .find(|(h, _)| h.name == used_provider);
        if let (Some((_, primary_p)), Some((_, used_p))) = (primary_caps, used_caps) {
            let pc = primary_p.capabilities();
            let uc = used_p.capabilities();
            if uc.max_context_tokens < pc.max_context_tokens
                || uc.max_output_tokens < pc.max_output_tokens
            {
                parts.push(
                    "Running on a smaller model -- responses may be less detailed".to_string(),
                );
            }
        }

        // Check cost escalation
        if let (Some(primary_cost), Some(used_cost)) = (
            self.blended_cost(&self.primary_provider_name),
            self.blended_cost(used_provider),
        ) {
            if primary_cost > 0.0 {
                let ratio = used_cost / primary_cost;
                if ratio > self.cost_warning_multiplier {
                    parts.push(format!(
                        "Note: {used_provider} costs ~{ratio:.1}x more than {}",
                        self.primary_provider_name
                    ));
                }
            }
        }

        Some(parts.join(". "))
    }

    /// Send a completion request through the fallback chain.
    ///
    /// Tries providers in selection order for the given task category.
    /// On transient errors (provider down, rate limited, overloaded,
    /// timed out), fails over to the next available provider. Auth and
    /// config errors are returned immediately without failover.
    pub async fn complete(
        &mut self,
        request: &CompletionRequest,
        task: TaskCategory,
    ) -> Result<FallbackResult, LlmError> {
        let indices = self.sorted_indices(task);
        let mut last_error: Option<LlmError> = None;

        for idx in indices {
            let provider_name = self.providers[idx].0.name.clone();

            // Rate-limited but within queue timeout: wait it out
            if let Some(until) = self.providers[idx].0.rate_limit_until() {
                let now = Instant::now();
                if now < until {
                    let remaining_ms = until.duration_since(now).as_millis() as u64;
                    if remaining_ms <= self.rate_limit_queue_timeout_ms {
                        tracing::debug!(
                            provider = %provider_name,
                            remaining_ms,
                            "Queuing for rate-limited provider"
                        );
                        tokio::time::sleep(until.duration_since(now)).await;
                        self.providers[idx].0.clear_rate_limit();
                    }
                }
            }

            // Check availability (circuit breaker + rate limit)
            if !self.providers[idx].0.is_available() {
                tracing::debug!(provider = %provider_name, "Provider unavailable, skipping");
                continue;
            }

            let start = Instant::now();
            let (_health, provider) = &mut self.providers[idx];

            let outcome = match tokio::time::timeout(self.request_timeout, provider.complete(request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                }),
            };

            match outcome {
                Ok(response) => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    self.providers[idx].0.record_success(Some(latency_ms));

                    let failover_warning = self.build_failover_warning(&provider_name);
                    if let Some(ref warning) = failover_warning {
                        tracing::warn!(%warning, "Failover occurred");
                    }

                    return Ok(FallbackResult {
                        response,
                        provider_name,
                        failover_warning,
                    });
                }
                Err(err) => {
                    let latency_ms = start.elapsed().as_millis() as u64;

                    // Non-failover errors: return immediately
                    if !ProviderHealth::is_failover_error(&err) {
                        tracing::error!(
                            provider = %provider_name,
                            error = %err,
                            "Non-failover error, returning immediately"
                        );
                        return Err(err);
                    }

                    tracing::warn!(
                        provider = %provider_name,
                        error = %err,
                        "Provider failed, trying next in chain"
                    );

                    // Handle rate-limited specifically: set the rate limit timer
                    if let LlmError::RateLimited { retry_after_ms } = &err {
                        self.providers[idx]
                            .0
                            .set_rate_limited(*retry_after_ms, self.rate_limit_queue_timeout_ms);
                    }

                    self.providers[idx].0.record_failure(&err, Some(latency_ms));
                    last_error = Some(err);
                }
            }
        }

        // All providers exhausted
        Err(last_error.unwrap_or(LlmError::Provider {
            message: "All providers in the fallback chain are unavailable".to_string(),
        }))
    }

    /// Select a provider for streaming and return its stream.
    ///
    /// Selects the first available provider in selection order and starts
    /// its stream. Mid-stream failover is not possible -- if the stream
    /// errors after starting, the error is propagated to the caller.
    pub fn select_stream(
        &mut self,
        request: CompletionRequest,
        task: TaskCategory,
    ) -> Result<StreamSelection, LlmError> {
        let indices = self.sorted_indices(task);

        for idx in indices {
            if !self.providers[idx].0.is_available() {
                let name = &self.providers[idx].0.name;
                tracing::debug!(provider = %name, "Provider unavailable for streaming, skipping");
                continue;
            }

            let provider_name = self.providers[idx].0.name.clone();
            let (_, provider) = &self.providers[idx];
            let stream = provider.stream(request);

            let failover_warning = self.build_failover_warning(&provider_name);
            if let Some(ref warning) = failover_warning {
                tracing::warn!(%warning, "Failover occurred (streaming)");
            }

            return Ok(StreamSelection {
                stream,
                provider_name,
                failover_warning,
            });
        }

        Err(LlmError::Provider {
            message: "All providers in the fallback chain are unavailable".to_string(),
        })
    }

    /// Record a stream success for the named provider. Streams carry no
    /// single latency reading, so none is recorded.
    pub fn record_stream_success(&mut self, provider_name: &str) {
        if let Some((health, _)) = self
            .providers
            .iter_mut()
            .find(|(h, _)| h.name == provider_name)
        {
            health.record_success(None);
        }
    }

    /// Record a stream failure for the named provider.
    pub fn record_stream_failure(&mut self, provider_name: &str, error: &LlmError) {
        if let Some((health, _)) = self
            .providers
            .iter_mut()
            .find(|(h, _)| h.name == provider_name)
        {
            health.record_failure(error, None);
        }
    }
}

/// Whole-percent bucket of a provider's recent error rate, so the
/// selection ordering ignores sub-percent noise.
fn error_bucket(health: &ProviderHealth) -> u32 {
    (health.recent_error_rate() * 100.0).round() as u32
}
