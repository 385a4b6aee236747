//! Persona and health-signal types for Stride.
//!
//! Personas are a small closed set of discrete coaching styles with fixed
//! instructions, selected once per user. Live health signals adapt the
//! persona's framing through threshold rules in the persona engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// A discrete coaching persona.
///
/// Closed set, defined at build time. Replaces an earlier experiment with
/// continuous trait blending; each mode carries fixed core instructions
/// plus rule-based context adaptation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaMode {
    Encourager,
    Strategist,
    DirectTrainer,
    RecoverySpecialist,
}

impl PersonaMode {
    /// All modes, in stable order.
    pub const ALL: [PersonaMode; 4] = [
        PersonaMode::Encourager,
        PersonaMode::Strategist,
        PersonaMode::DirectTrainer,
        PersonaMode::RecoverySpecialist,
    ];
}

impl fmt::Display for PersonaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonaMode::Encourager => write!(f, "encourager"),
            PersonaMode::Strategist => write!(f, "strategist"),
            PersonaMode::DirectTrainer => write!(f, "direct_trainer"),
            PersonaMode::RecoverySpecialist => write!(f, "recovery_specialist"),
        }
    }
}

impl FromStr for PersonaMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "encourager" => Ok(PersonaMode::Encourager),
            "strategist" => Ok(PersonaMode::Strategist),
            "direct_trainer" => Ok(PersonaMode::DirectTrainer),
            "recovery_specialist" => Ok(PersonaMode::RecoverySpecialist),
            other => Err(format!("invalid persona mode: '{other}'")),
        }
    }
}

/// Static definition of a persona: display name plus core instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaDefinition {
    pub mode: PersonaMode,
    pub display_name: String,
    pub core_instructions: String,
}

/// Discrete energy level from the health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyLevel {
    Low,
    Moderate,
    High,
}

/// Discrete stress level from the health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StressLevel {
    Low,
    Moderate,
    High,
}

/// Discrete sleep quality from the health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SleepQuality {
    Poor,
    Fair,
    Good,
}

/// Discrete recovery readiness from the health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Compromised,
    Adequate,
    FullyRecovered,
}

/// Read-only structured snapshot of the user's current state, supplied
/// by an external health-data provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub energy: EnergyLevel,
    pub stress: StressLevel,
    pub sleep_quality: SleepQuality,
    pub recovery: RecoveryStatus,
    pub captured_at: DateTime<Utc>,
}

impl HealthSnapshot {
    /// A neutral snapshot for when no signals are available.
    pub fn neutral(captured_at: DateTime<Utc>) -> Self {
        Self {
            energy: EnergyLevel::Moderate,
            stress: StressLevel::Moderate,
            sleep_quality: SleepQuality::Fair,
            recovery: RecoveryStatus::Adequate,
            captured_at,
        }
    }
}

/// The user's current goal, read-only from the profile store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGoal {
    pub summary: String,
    pub target_date: Option<NaiveDate>,
}
