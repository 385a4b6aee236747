//! Core configuration types for Stride.
//!
//! `CoreConfig` collects the tunable heuristics of the orchestration
//! core. All fields have serde defaults so an empty TOML file is valid.

use serde::{Deserialize, Serialize};

use crate::routing::RouterConfig;

/// Tunables for prompt assembly and budgeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Conversation turns included in the prompt.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Maximum characters per compacted history turn.
    #[serde(default = "default_history_turn_max_chars")]
    pub history_turn_max_chars: usize,

    /// Approximate token ceiling for an assembled prompt. Exceeding it
    /// logs a warning but never blocks sending.
    #[serde(default = "default_token_ceiling")]
    pub token_ceiling: u32,

    /// Characters-per-token divisor for the rough token estimate.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: u32,
}

fn default_history_turns() -> usize {
    5
}

fn default_history_turn_max_chars() -> usize {
    280
}

fn default_token_ceiling() -> u32 {
    2000
}

fn default_chars_per_token() -> u32 {
    4
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            history_turn_max_chars: default_history_turn_max_chars(),
            token_ceiling: default_token_ceiling(),
            chars_per_token: default_chars_per_token(),
        }
    }
}

/// Top-level configuration for the orchestration core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub prompt: PromptConfig,

    /// Per-function-execution timeout in milliseconds.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// Backoff before the single retry of a transient store error.
    #[serde(default = "default_store_retry_backoff_ms")]
    pub store_retry_backoff_ms: u64,
}

fn default_dispatch_timeout_ms() -> u64 {
    10_000
}

fn default_store_retry_backoff_ms() -> u64 {
    250
}

/// Cost information for a specific provider/model pattern, used for
/// pricing-table overrides from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPricing {
    /// Name of the provider (e.g., "anthropic", "openai").
    pub provider_name: String,
    /// Prefix pattern for matching model names (e.g., "claude-sonnet-4").
    pub model_pattern: String,
    /// Cost per million input tokens in USD.
    pub input_cost_per_million: f64,
    /// Cost per million output tokens in USD.
    pub output_cost_per_million: f64,
}
