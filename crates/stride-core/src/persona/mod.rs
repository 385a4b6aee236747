//! Persona engine: discrete persona definitions, context adaptation
//! rules, and system prompt assembly.

pub mod adaptation;
pub mod definitions;
pub mod engine;

pub use engine::{AssembledPrompt, PersonaEngine, PromptRequest};
