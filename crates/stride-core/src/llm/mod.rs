//! LLM orchestration: provider trait, fallback chain, health tracking,
//! and the cache-fronted orchestrator.

pub mod box_provider;
pub mod fallback;
pub mod health;
pub mod orchestrator;
pub mod provider;

pub use box_provider::BoxLlmProvider;
pub use fallback::{FallbackChain, FallbackResult};
pub use health::{BreakerPolicy, CircuitState, ProviderHealth};
pub use orchestrator::LlmOrchestrator;
pub use provider::LlmProvider;
