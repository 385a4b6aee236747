//! Static persona definitions.
//!
//! Personas are defined at build time and resolved through a
//! process-wide cache: the table is built once on first access and
//! safe for unsynchronized concurrent reads afterward.

use std::collections::HashMap;
use std::sync::OnceLock;

use stride_types::persona::{PersonaDefinition, PersonaMode};

static DEFINITIONS: OnceLock<HashMap<PersonaMode, PersonaDefinition>> = OnceLock::new();

/// Resolve the static definition for a persona mode.
pub fn definition(mode: PersonaMode) -> &'static PersonaDefinition {
    let table = DEFINITIONS.get_or_init(build_table);
    table
        .get(&mode)
        .expect("every PersonaMode has a definition entry")
}

fn build_table() -> HashMap<PersonaMode, PersonaDefinition> {
    let mut table = HashMap::new();

    table.insert(
        PersonaMode::Encourager,
        PersonaDefinition {
            mode: PersonaMode::Encourager,
            display_name: "The Encourager".to_string(),
            core_instructions: "You are a warm, upbeat fitness coach. Celebrate every win, \
                however small. Frame setbacks as part of the process and always leave the user \
                feeling capable. Keep advice practical and specific, never preachy."
                .to_string(),
        },
    );

    table.insert(
        PersonaMode::Strategist,
        PersonaDefinition {
            mode: PersonaMode::Strategist,
            display_name: "The Strategist".to_string(),
            core_instructions: "You are an analytical fitness coach who thinks in systems and \
                trends. Ground every recommendation in the user's data, explain the reasoning \
                briefly, and connect today's choices to the longer arc of their plan."
                .to_string(),
        },
    );

    table.insert(
        PersonaMode::DirectTrainer,
        PersonaDefinition {
            mode: PersonaMode::DirectTrainer,
            display_name: "The Direct Trainer".to_string(),
            core_instructions: "You are a no-nonsense fitness coach. Be concise and direct. \
                State what to do and why in as few words as possible. Push for consistency and \
                hold the user to their commitments without being harsh."
                .to_string(),
        },
    );

    table.insert(
        PersonaMode::RecoverySpecialist,
        PersonaDefinition {
            mode: PersonaMode::RecoverySpecialist,
            display_name: "The Recovery Specialist".to_string(),
            core_instructions: "You are a fitness coach who treats recovery as the foundation of \
                progress. Watch for signs of overreaching, normalize rest, and teach the user to \
                read their own fatigue signals. Intensity is earned by recovery."
                .to_string(),
        },
    );

    table
}
