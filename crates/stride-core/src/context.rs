//! Collaborator traits for data this core consumes but does not own.
//!
//! The health snapshot and user profile live outside the orchestration
//! core; these traits are the narrow read-only contracts through which
//! they are supplied. Implementations live in the host application.
//! Uses native async fn in traits (RPITIT, Rust 2024 edition).

use uuid::Uuid;

use stride_types::persona::{HealthSnapshot, PersonaMode, UserGoal};

/// Supplies the current health/context snapshot for a user.
pub trait SnapshotProvider: Send + Sync {
    fn current_snapshot(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = anyhow::Result<HealthSnapshot>> + Send;
}

/// Supplies the user's selected persona and goal text.
pub trait ProfileProvider: Send + Sync {
    fn persona_mode(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = anyhow::Result<PersonaMode>> + Send;

    fn user_goal(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = anyhow::Result<Option<UserGoal>>> + Send;
}
