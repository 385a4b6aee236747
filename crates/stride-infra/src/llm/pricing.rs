//! Cost estimation and pricing for LLM providers.
//!
//! Provides a hardcoded default pricing table for known models with
//! user override capability from `config.toml`. Cost estimates are
//! clearly labeled as approximate (`~$0.12`).

use stride_types::config::ProviderPricing;
use stride_types::llm::ProviderCostInfo;

/// Internal pricing entry for the hardcoded default table.
struct PricingEntry {
    provider: &'static str,
    model_pattern: &'static str,
    input_cost_per_million: f64,
    output_cost_per_million: f64,
}

/// Conservative fallback pricing when no model match is found.
const FALLBACK_INPUT_COST: f64 = 5.0;
const FALLBACK_OUTPUT_COST: f64 = 15.0;

/// Return the hardcoded default pricing table for known providers/models.
///
/// Prices are approximate as of early 2026 and expressed in USD per million tokens.
fn default_pricing_table() -> Vec<PricingEntry> {
    vec![
        // Anthropic
        PricingEntry {
            provider: "anthropic",
            model_pattern: "claude-sonnet-4",
            input_cost_per_million: 3.0,
            output_cost_per_million: 15.0,
        },
        PricingEntry {
            provider: "anthropic",
            model_pattern: "claude-opus-4",
            input_cost_per_million: 15.0,
            output_cost_per_million: 75.0,
        },
        PricingEntry {
            provider: "anthropic",
            model_pattern: "claude-haiku-3",
            input_cost_per_million: 0.25,
            output_cost_per_million: 1.25,
        },
        // OpenAI
        PricingEntry {
            provider: "openai",
            model_pattern: "gpt-4o-mini",
            input_cost_per_million: 0.15,
            output_cost_per_million: 0.60,
        },
        PricingEntry {
            provider: "openai",
            model_pattern: "gpt-4o",
            input_cost_per_million: 2.50,
            output_cost_per_million: 10.0,
        },
        // Groq
        PricingEntry {
            provider: "groq",
            model_pattern: "llama-3",
            input_cost_per_million: 0.59,
            output_cost_per_million: 0.79,
        },
    ]
}

/// Check if a model name matches a pattern using simple prefix matching.
///
/// The pattern is treated as a prefix: `"claude-sonnet-4"` matches
/// `"claude-sonnet-4-20250514"`, `"claude-sonnet-4.5"`, etc.
fn matches_pattern(model: &str, pattern: &str) -> bool {
    model.starts_with(pattern)
}

/// Resolve per-million rates for a provider/model pair.
///
/// Lookup order: user overrides, then the default table, then the
/// conservative fallback. The result feeds the fallback chain's cost
/// table for cheap-first selection and failover cost warnings.
pub fn cost_info_for(
    provider: &str,
    model: &str,
    user_pricing: &[ProviderPricing],
) -> ProviderCostInfo {
    let (input, output) = resolve_rates(provider, model, user_pricing);
    ProviderCostInfo {
        provider_name: provider.to_string(),
        model: model.to_string(),
        input_cost_per_million: input,
        output_cost_per_million: output,
    }
}

fn resolve_rates(provider: &str, model: &str, user_pricing: &[ProviderPricing]) -> (f64, f64) {
    // 1. User overrides first
    for pricing in user_pricing {
        if pricing.provider_name == provider && matches_pattern(model, &pricing.model_pattern) {
            return (
                pricing.input_cost_per_million,
                pricing.output_cost_per_million,
            );
        }
    }

    // 2. Default pricing table
    for entry in &default_pricing_table() {
        if entry.provider == provider && matches_pattern(model, entry.model_pattern) {
            return (entry.input_cost_per_million, entry.output_cost_per_million);
        }
    }

    // 3. Conservative fallback
    (FALLBACK_INPUT_COST, FALLBACK_OUTPUT_COST)
}

/// Estimate the cost of a request in USD.
pub fn estimate_cost(
    input_tokens: u32,
    output_tokens: u32,
    model: &str,
    provider: &str,
    user_pricing: &[ProviderPricing],
) -> f64 {
    let (input_rate, output_rate) = resolve_rates(provider, model, user_pricing);
    compute_cost(input_tokens, output_tokens, input_rate, output_rate)
}

/// Compute cost in USD given token counts and per-million rates.
fn compute_cost(
    input_tokens: u32,
    output_tokens: u32,
    input_cost_per_million: f64,
    output_cost_per_million: f64,
) -> f64 {
    let input_cost = (input_tokens as f64 / 1_000_000.0) * input_cost_per_million;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * output_cost_per_million;
    input_cost + output_cost
}

/// Format a cost estimate as a human-readable string.
///
/// Always prefixed with `~` to indicate the value is an estimate.
/// - Costs below $0.01 use 3 decimal places: `~$0.001`
/// - Costs $0.01 and above use 2 decimal places: `~$0.12`
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("~${cost:.3}")
    } else {
        format!("~${cost:.2}")
    }
}
