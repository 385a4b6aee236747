//! System prompt assembly for the coaching personas.
//!
//! Assembles the system prompt from the persona's core instructions,
//! context-adaptation clauses, the user's goal, compacted recent
//! history, and (when the route calls for it) the function manifest,
//! using XML tag boundaries for clear section delineation.
//!
//! Layout:
//! ```text
//! <identity>{persona core instructions}</identity>
//! <goal>Current goal: ...</goal>
//! <context_adaptations>- clause...</context_adaptations>
//! <recent_conversation>user: ... / coach: ...</recent_conversation>
//! <available_functions>- name: description ...</available_functions>
//! <instructions>Never break character... The current time is {now}.</instructions>
//! ```
//!
//! Assembly is a pure function of its inputs; the only hidden state is
//! the static per-persona definition cache, so concurrent builds for
//! different personas are safe.

use chrono::{DateTime, Utc};
use tracing::warn;

use stride_observe::genai_attrs;
use stride_types::config::PromptConfig;
use stride_types::function::FunctionDefinition;
use stride_types::message::{Message, Role};
use stride_types::persona::{HealthSnapshot, PersonaMode, UserGoal};

use super::adaptation::adaptations_for;
use super::definitions::definition;

/// Inputs for one prompt assembly.
pub struct PromptRequest<'a> {
    pub mode: PersonaMode,
    pub goal: Option<&'a UserGoal>,
    pub snapshot: &'a HealthSnapshot,
    /// Recent history in chronological order; the engine takes the tail.
    pub history: &'a [Message],
    /// Function manifest, present when the route includes function calling.
    pub functions: Option<&'a [&'a FunctionDefinition]>,
    pub now: DateTime<Utc>,
}

/// An assembled system prompt with its budget estimate.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub system: String,
    pub estimated_tokens: u32,
    pub over_budget: bool,
}

/// Builds system prompts from persona definitions and live context.
pub struct PersonaEngine {
    config: PromptConfig,
}

impl PersonaEngine {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    /// Assemble the system prompt for a request.
    ///
    /// Exceeding the token ceiling logs a warning and marks the result;
    /// it never blocks sending.
    pub fn build(&self, request: &PromptRequest<'_>) -> AssembledPrompt {
        let _span = tracing::info_span!(
            "build_prompt",
            gen_ai.operation.name = genai_attrs::OP_BUILD_PROMPT,
            persona = %request.mode,
        )
        .entered();

        let def = definition(request.mode);
        let mut sections = Vec::with_capacity(6);

        sections.push(format!(
            "<identity>\nYou are {}, the user's fitness coach.\n{}\n</identity>",
            def.display_name, def.core_instructions
        ));

        if let Some(goal) = request.goal {
            let date_part = goal
                .target_date
                .map(|d| format!(" (target date: {d})"))
                .unwrap_or_default();
            sections.push(format!(
                "<goal>\nCurrent goal: {}{date_part}\n</goal>",
                goal.summary
            ));
        }

        let clauses = adaptations_for(request.snapshot);
        if !clauses.is_empty() {
            let lines: Vec<String> = clauses.iter().map(|c| format!("- {c}")).collect();
            sections.push(format!(
                "<context_adaptations>\n{}\n</context_adaptations>",
                lines.join("\n")
            ));
        }

        let history = self.compact_history(request.history);
        if !history.is_empty() {
            sections.push(format!(
                "<recent_conversation>\n{history}\n</recent_conversation>"
            ));
        }

        if let Some(functions) = request.functions {
            if !functions.is_empty() {
                let lines: Vec<String> =
                    functions.iter().map(|d| d.manifest_line()).collect();
                sections.push(format!(
                    "<available_functions>\n\
                     You can call these functions when the user needs data or a plan change. \
                     To call one, reply with a single block:\n\
                     <function_call name=\"FUNCTION_NAME\">{{\"arg\": \"value\"}}</function_call>\n\
                     Available:\n{}\n\
                     </available_functions>",
                    lines.join("\n")
                ));
            }
        }

        // Minute resolution keeps identical requests within the same
        // minute on the same cache fingerprint
        sections.push(format!(
            "<instructions>\n\
             Never break character or mention that you are an AI system.\n\
             Ground statements in the data you have; if you lack data, say so honestly.\n\
             The current time is {}.\n\
             </instructions>",
            request.now.format("%Y-%m-%d %H:%M UTC")
        ));

        let system = sections.join("\n\n");
        let estimated_tokens =
            (system.chars().count() as u32).div_ceil(self.config.chars_per_token.max(1));
        let over_budget = estimated_tokens > self.config.token_ceiling;
        if over_budget {
            warn!(
                persona = %request.mode,
                estimated_tokens,
                ceiling = self.config.token_ceiling,
                "Assembled prompt exceeds token ceiling"
            );
        }

        AssembledPrompt {
            system,
            estimated_tokens,
            over_budget,
        }
    }

    /// Take the last `history_turns` messages and compact each to the
    /// configured character bound.
    fn compact_history(&self, history: &[Message]) -> String {
        let tail_start = history.len().saturating_sub(self.config.history_turns);
        history[tail_start..]
            .iter()
            .map(|m| {
                let speaker = match m.role {
                    Role::User => "user",
                    Role::Assistant => "coach",
                    Role::Function => "data",
                };
                format!(
                    "{speaker}: {}",
                    truncate_chars(&m.content, self.config.history_turn_max_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Truncate at a char boundary, appending an ellipsis marker when cut.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}
