//! Routing types for Stride.
//!
//! `ProcessingRoute` is a per-request decision recomputed on every user
//! turn; `ChainContext` is the short-lived per-conversation state that
//! preserves multi-step function workflows across turns.

use serde::{Deserialize, Serialize};

use std::fmt;

/// The processing strategy chosen for one user turn.
///
/// Never persisted and never inherited across turns: the router
/// recomputes it for every incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingRoute {
    /// Full function-calling workflow with the manifest in the prompt.
    FunctionCalling,
    /// Direct generation with a lean prompt, no dispatcher involvement.
    DirectAi,
    /// Direct generation with the manifest available so the model can
    /// still request a function if it decides one is needed.
    Hybrid,
}

impl fmt::Display for ProcessingRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingRoute::FunctionCalling => write!(f, "function_calling"),
            ProcessingRoute::DirectAi => write!(f, "direct_ai"),
            ProcessingRoute::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Per-conversation chain state, mutated only by the router.
///
/// `recent_function_names` is bounded; the oldest entry is evicted first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainContext {
    pub recent_function_names: Vec<String>,
    pub chain_probability: f64,
    pub workflow_active: bool,
    /// Consecutive completed turns without a function execution.
    pub turns_since_function: u32,
}

/// Routing heuristics as configuration.
///
/// The classification thresholds were tuned empirically in production;
/// they are deliberately configurable rather than hard-coded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Chain probability above which an active workflow stays on the
    /// function-calling route.
    #[serde(default = "default_chain_probability_threshold")]
    pub chain_probability_threshold: f64,
    /// Signals indicating planning or multi-step analysis.
    #[serde(default = "default_complex_keywords")]
    pub complex_keywords: Vec<String>,
    /// Action-verb prefixes marking short parse-style commands.
    #[serde(default = "default_action_verbs")]
    pub action_verbs: Vec<String>,
    /// Maximum length in characters for a simple-parsing message.
    #[serde(default = "default_simple_max_chars")]
    pub simple_max_chars: usize,
    /// Maximum entries retained in `ChainContext.recent_function_names`.
    #[serde(default = "default_max_recent_functions")]
    pub max_recent_functions: usize,
    /// How much a function execution raises the chain probability.
    #[serde(default = "default_chain_increase")]
    pub chain_increase: f64,
    /// How much each function-free turn decays the chain probability.
    #[serde(default = "default_chain_decay")]
    pub chain_decay: f64,
    /// Function-free turns before the workflow flag clears.
    #[serde(default = "default_decay_turns")]
    pub decay_turns: u32,
    /// Whether hybrid-route prompts include the function manifest.
    #[serde(default = "default_hybrid_includes_manifest")]
    pub hybrid_includes_manifest: bool,
}

fn default_chain_probability_threshold() -> f64 {
    0.7
}

fn default_complex_keywords() -> Vec<String> {
    [
        "plan",
        "program",
        "routine",
        "adjust",
        "restructure",
        "analyze",
        "compare",
        "progression",
        "periodize",
        "deload",
        "week",
        "schedule",
        "strategy",
        "milestone",
        "step by step",
        "break down",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

fn default_action_verbs() -> Vec<String> {
    ["log", "add", "track", "record", "save", "note"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_simple_max_chars() -> usize {
    80
}

fn default_max_recent_functions() -> usize {
    5
}

fn default_chain_increase() -> f64 {
    0.3
}

fn default_chain_decay() -> f64 {
    0.25
}

fn default_decay_turns() -> u32 {
    2
}

fn default_hybrid_includes_manifest() -> bool {
    true
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            chain_probability_threshold: default_chain_probability_threshold(),
            complex_keywords: default_complex_keywords(),
            action_verbs: default_action_verbs(),
            simple_max_chars: default_simple_max_chars(),
            max_recent_functions: default_max_recent_functions(),
            chain_increase: default_chain_increase(),
            chain_decay: default_chain_decay(),
            decay_turns: default_decay_turns(),
            hybrid_includes_manifest: default_hybrid_includes_manifest(),
        }
    }
}
