//! LLM provider implementations.
//!
//! Concrete `LlmProvider` backends over HTTP plus cost estimation.

pub mod anthropic;
pub mod openai_compat;
pub mod pricing;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
