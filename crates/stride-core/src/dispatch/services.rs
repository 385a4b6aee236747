//! Domain-service collaborator traits consumed by the built-in
//! executors.
//!
//! Each service exposes async operations matching the function
//! definitions in [`super::builtins`]; the dispatcher is the only
//! caller. Implementations live in the host application (workout
//! tracker, nutrition log, analytics pipeline). Results come back as
//! structured JSON: the executors only shape and forward them.
//! Uses native async fn in traits (RPITIT, Rust 2024 edition).

use std::future::Future;

use uuid::Uuid;

/// Filters for a workout-history query.
#[derive(Debug, Clone, Default)]
pub struct WorkoutQuery {
    pub exercise: Option<String>,
    pub muscle_group: Option<String>,
    pub days: u32,
}

/// Request to generate a personalized training plan.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub weeks: u32,
    pub sessions_per_week: Option<u32>,
    pub focus: Option<String>,
}

/// Request to set a user goal.
#[derive(Debug, Clone)]
pub struct GoalRequest {
    pub goal_type: String,
    pub target: String,
}

/// Workout history and plan generation.
pub trait WorkoutService: Send + Sync {
    fn query_workouts(
        &self,
        user_id: &Uuid,
        query: WorkoutQuery,
    ) -> impl Future<Output = anyhow::Result<serde_json::Value>> + Send;

    fn generate_plan(
        &self,
        user_id: &Uuid,
        request: PlanRequest,
    ) -> impl Future<Output = anyhow::Result<serde_json::Value>> + Send;

    fn adjust_plan(
        &self,
        user_id: &Uuid,
        reason: &str,
    ) -> impl Future<Output = anyhow::Result<serde_json::Value>> + Send;
}

/// Nutrition history.
pub trait NutritionService: Send + Sync {
    fn query_nutrition(
        &self,
        user_id: &Uuid,
        days: u32,
        include_meals: bool,
    ) -> impl Future<Output = anyhow::Result<serde_json::Value>> + Send;
}

/// Recovery metrics (sleep, HRV, resting heart rate).
pub trait RecoveryService: Send + Sync {
    fn query_recovery(
        &self,
        user_id: &Uuid,
        days: u32,
    ) -> impl Future<Output = anyhow::Result<serde_json::Value>> + Send;
}

/// Goal setting and progress tracking.
pub trait GoalService: Send + Sync {
    fn set_goal(
        &self,
        user_id: &Uuid,
        request: GoalRequest,
    ) -> impl Future<Output = anyhow::Result<serde_json::Value>> + Send;

    fn track_progress(
        &self,
        user_id: &Uuid,
    ) -> impl Future<Output = anyhow::Result<serde_json::Value>> + Send;
}

/// Background-generated insights.
pub trait InsightService: Send + Sync {
    fn query_insights(
        &self,
        user_id: &Uuid,
        category: Option<&str>,
        limit: u32,
    ) -> impl Future<Output = anyhow::Result<serde_json::Value>> + Send;
}
