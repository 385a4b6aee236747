//! Context adaptation rules over health signals.
//!
//! Each rule is an independent threshold check producing a short
//! directive clause. Rules are evaluated in a fixed order and every
//! firing rule contributes its clause, so the output for a given
//! snapshot is order-stable and composable.

use stride_types::persona::{
    EnergyLevel, HealthSnapshot, RecoveryStatus, SleepQuality, StressLevel,
};

/// One adaptation rule: a predicate over the snapshot plus the directive
/// it emits when it fires.
struct AdaptationRule {
    applies: fn(&HealthSnapshot) -> bool,
    directive: &'static str,
}

const RULES: [AdaptationRule; 6] = [
    AdaptationRule {
        applies: |s| s.energy == EnergyLevel::Low,
        directive: "Energy is low today: soften intensity, suggest lighter options, and do not \
                    push for extra volume.",
    },
    AdaptationRule {
        applies: |s| s.stress == StressLevel::High,
        directive: "Stress is high: prioritize emotional support over programming, whatever your \
                    usual style.",
    },
    AdaptationRule {
        applies: |s| s.sleep_quality == SleepQuality::Poor,
        directive: "Sleep was poor: frame today around recovery and treat performance dips as \
                    expected, not as failure.",
    },
    AdaptationRule {
        applies: |s| s.recovery == RecoveryStatus::Compromised,
        directive: "Recovery is compromised: cap training-load suggestions and steer toward \
                    mobility or rest.",
    },
    AdaptationRule {
        applies: |s| {
            s.energy == EnergyLevel::High && s.recovery == RecoveryStatus::FullyRecovered
        },
        directive: "Energy is high and recovery is complete: this is a good day to challenge the \
                    user.",
    },
    AdaptationRule {
        applies: |s| s.sleep_quality == SleepQuality::Good && s.stress == StressLevel::Low,
        directive: "The user is well rested and calm: normal coaching intensity applies.",
    },
];

/// Evaluate all rules against a snapshot.
///
/// Returns the directives of every firing rule in declaration order.
/// Multiple rules may fire simultaneously; none is exclusive.
pub fn adaptations_for(snapshot: &HealthSnapshot) -> Vec<&'static str> {
    RULES
        .iter()
        .filter(|rule| (rule.applies)(snapshot))
        .map(|rule| rule.directive)
        .collect()
}
