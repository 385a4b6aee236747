//! Built-in fitness function executors.
//!
//! These bind the registry's function definitions to the domain-service
//! traits in [`super::services`]. Argument ranges mirror the published
//! tool contracts: day windows clamp rather than reject, required fields
//! fail fast with `InvalidArgument`, and downstream service errors are
//! wrapped as `ExecutionFailed` with their message preserved for the
//! model.

use std::sync::Arc;

use stride_types::function::{
    ArgumentMap, FunctionDefinition, FunctionErrorKind, FunctionValue, ParameterSpec,
    ParameterType,
};

use crate::request_context::RequestContext;

use super::executor::{BoxFunctionExecutor, FunctionExecutor};
use super::registry::FunctionRegistry;
use super::services::{
    GoalRequest, GoalService, InsightService, NutritionService, PlanRequest, RecoveryService,
    WorkoutQuery, WorkoutService,
};

const INSIGHT_CATEGORIES: [&str; 5] = ["correlation", "trend", "anomaly", "milestone", "nudge"];
const GOAL_TYPES: [&str; 4] = ["cut", "bulk", "recomp", "maintain"];

fn execution_failed(e: anyhow::Error) -> FunctionErrorKind {
    FunctionErrorKind::ExecutionFailed {
        reason: e.to_string(),
    }
}

fn string_param(name: &str, description: &str, required: bool) -> ParameterSpec {
    ParameterSpec {
        name: name.to_string(),
        description: description.to_string(),
        param_type: ParameterType::String,
        required,
    }
}

fn integer_param(name: &str, description: &str, required: bool) -> ParameterSpec {
    ParameterSpec {
        name: name.to_string(),
        description: description.to_string(),
        param_type: ParameterType::Integer,
        required,
    }
}

// ---------------------------------------------------------------------------
// query_workouts
// ---------------------------------------------------------------------------

pub struct QueryWorkoutsExecutor<W: WorkoutService> {
    service: Arc<W>,
    definition: FunctionDefinition,
}

impl<W: WorkoutService> QueryWorkoutsExecutor<W> {
    pub fn new(service: Arc<W>) -> Self {
        Self {
            service,
            definition: FunctionDefinition {
                name: "query_workouts".to_string(),
                description: "Query workout history. Use when the user asks about specific \
                              exercises, training history, volume, or PRs."
                    .to_string(),
                parameters: vec![
                    string_param("exercise", "Filter by exercise name (e.g., 'bench press')", false),
                    string_param("muscle_group", "Filter by muscle group (e.g., 'chest')", false),
                    integer_param("days", "Number of days to query (1-90, default 14)", false),
                ],
            },
        }
    }
}

impl<W: WorkoutService> FunctionExecutor for QueryWorkoutsExecutor<W> {
    fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: &ArgumentMap,
        ctx: &RequestContext,
    ) -> Result<FunctionValue, FunctionErrorKind> {
        let query = WorkoutQuery {
            exercise: args.optional_str("exercise")?.map(str::to_string),
            muscle_group: args.optional_str("muscle_group")?.map(str::to_string),
            days: args.i64_clamped("days", 1, 90, 14)? as u32,
        };
        let data = self
            .service
            .query_workouts(&ctx.user_id, query)
            .await
            .map_err(execution_failed)?;
        Ok(FunctionValue::Json(data))
    }
}

// ---------------------------------------------------------------------------
// query_nutrition
// ---------------------------------------------------------------------------

pub struct QueryNutritionExecutor<N: NutritionService> {
    service: Arc<N>,
    definition: FunctionDefinition,
}

impl<N: NutritionService> QueryNutritionExecutor<N> {
    pub fn new(service: Arc<N>) -> Self {
        Self {
            service,
            definition: FunctionDefinition {
                name: "query_nutrition".to_string(),
                description: "Query nutrition history. Use when the user asks about eating \
                              patterns, macro trends, or compliance."
                    .to_string(),
                parameters: vec![
                    integer_param("days", "Number of days to query (1-30, default 7)", false),
                    ParameterSpec {
                        name: "include_meals".to_string(),
                        description: "Include individual meal entries (default false)".to_string(),
                        param_type: ParameterType::Boolean,
                        required: false,
                    },
                ],
            },
        }
    }
}

impl<N: NutritionService> FunctionExecutor for QueryNutritionExecutor<N> {
    fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: &ArgumentMap,
        ctx: &RequestContext,
    ) -> Result<FunctionValue, FunctionErrorKind> {
        let days = args.i64_clamped("days", 1, 30, 7)? as u32;
        let include_meals = args.bool_or("include_meals", false)?;
        let data = self
            .service
            .query_nutrition(&ctx.user_id, days, include_meals)
            .await
            .map_err(execution_failed)?;
        Ok(FunctionValue::Json(data))
    }
}

// ---------------------------------------------------------------------------
// query_recovery
// ---------------------------------------------------------------------------

pub struct QueryRecoveryExecutor<R: RecoveryService> {
    service: Arc<R>,
    definition: FunctionDefinition,
}

impl<R: RecoveryService> QueryRecoveryExecutor<R> {
    pub fn new(service: Arc<R>) -> Self {
        Self {
            service,
            definition: FunctionDefinition {
                name: "query_recovery".to_string(),
                description: "Query recovery metrics. Use when the user mentions sleep, HRV, \
                              fatigue, or readiness."
                    .to_string(),
                parameters: vec![integer_param(
                    "days",
                    "Number of days to query (7-30, default 14)",
                    false,
                )],
            },
        }
    }
}

impl<R: RecoveryService> FunctionExecutor for QueryRecoveryExecutor<R> {
    fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: &ArgumentMap,
        ctx: &RequestContext,
    ) -> Result<FunctionValue, FunctionErrorKind> {
        let days = args.i64_clamped("days", 7, 30, 14)? as u32;
        let data = self
            .service
            .query_recovery(&ctx.user_id, days)
            .await
            .map_err(execution_failed)?;
        Ok(FunctionValue::Json(data))
    }
}

// ---------------------------------------------------------------------------
// query_insights
// ---------------------------------------------------------------------------

pub struct QueryInsightsExecutor<I: InsightService> {
    service: Arc<I>,
    definition: FunctionDefinition,
}

impl<I: InsightService> QueryInsightsExecutor<I> {
    pub fn new(service: Arc<I>) -> Self {
        Self {
            service,
            definition: FunctionDefinition {
                name: "query_insights".to_string(),
                description: "Query generated insights. Use when the user asks about patterns, \
                              correlations, or 'what have you noticed'."
                    .to_string(),
                parameters: vec![
                    ParameterSpec {
                        name: "category".to_string(),
                        description: "Filter by insight category".to_string(),
                        param_type: ParameterType::Enumeration {
                            values: INSIGHT_CATEGORIES.iter().map(|s| (*s).to_string()).collect(),
                        },
                        required: false,
                    },
                    integer_param("limit", "Max insights to return (1-10, default 5)", false),
                ],
            },
        }
    }
}

impl<I: InsightService> FunctionExecutor for QueryInsightsExecutor<I> {
    fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: &ArgumentMap,
        ctx: &RequestContext,
    ) -> Result<FunctionValue, FunctionErrorKind> {
        let category = args.optional_enum("category", &INSIGHT_CATEGORIES)?;
        let limit = args.i64_clamped("limit", 1, 10, 5)? as u32;
        let data = self
            .service
            .query_insights(&ctx.user_id, category, limit)
            .await
            .map_err(execution_failed)?;
        Ok(FunctionValue::Json(data))
    }
}

// ---------------------------------------------------------------------------
// generate_workout_plan / adjust_workout_plan
// ---------------------------------------------------------------------------

pub struct GeneratePlanExecutor<W: WorkoutService> {
    service: Arc<W>,
    definition: FunctionDefinition,
}

impl<W: WorkoutService> GeneratePlanExecutor<W> {
    pub fn new(service: Arc<W>) -> Self {
        Self {
            service,
            definition: FunctionDefinition {
                name: "generate_workout_plan".to_string(),
                description: "Generate a personalized multi-week training plan for the user."
                    .to_string(),
                parameters: vec![
                    integer_param("weeks", "Plan length in weeks (1-52)", true),
                    integer_param("sessions_per_week", "Training sessions per week", false),
                    string_param("focus", "Emphasis (e.g., 'strength', 'hypertrophy')", false),
                ],
            },
        }
    }
}

impl<W: WorkoutService> FunctionExecutor for GeneratePlanExecutor<W> {
    fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: &ArgumentMap,
        ctx: &RequestContext,
    ) -> Result<FunctionValue, FunctionErrorKind> {
        let weeks = args.require_i64("weeks")?;
        if !(1..=52).contains(&weeks) {
            return Err(FunctionErrorKind::InvalidArgument {
                field: "weeks".to_string(),
                reason: "must be between 1 and 52".to_string(),
            });
        }
        let request = PlanRequest {
            weeks: weeks as u32,
            sessions_per_week: args.optional_i64("sessions_per_week")?.map(|v| v as u32),
            focus: args.optional_str("focus")?.map(str::to_string),
        };
        let data = self
            .service
            .generate_plan(&ctx.user_id, request)
            .await
            .map_err(execution_failed)?;
        Ok(FunctionValue::Json(data))
    }
}

pub struct AdjustPlanExecutor<W: WorkoutService> {
    service: Arc<W>,
    definition: FunctionDefinition,
}

impl<W: WorkoutService> AdjustPlanExecutor<W> {
    pub fn new(service: Arc<W>) -> Self {
        Self {
            service,
            definition: FunctionDefinition {
                name: "adjust_workout_plan".to_string(),
                description: "Adjust the user's active training plan (missed sessions, schedule \
                              changes, fatigue)."
                    .to_string(),
                parameters: vec![string_param("reason", "Why the plan needs adjusting", true)],
            },
        }
    }
}

impl<W: WorkoutService> FunctionExecutor for AdjustPlanExecutor<W> {
    fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: &ArgumentMap,
        ctx: &RequestContext,
    ) -> Result<FunctionValue, FunctionErrorKind> {
        let reason = args.require_str("reason")?;
        let data = self
            .service
            .adjust_plan(&ctx.user_id, reason)
            .await
            .map_err(execution_failed)?;
        Ok(FunctionValue::Json(data))
    }
}

// ---------------------------------------------------------------------------
// set_goal / track_goal_progress
// ---------------------------------------------------------------------------

pub struct SetGoalExecutor<G: GoalService> {
    service: Arc<G>,
    definition: FunctionDefinition,
}

impl<G: GoalService> SetGoalExecutor<G> {
    pub fn new(service: Arc<G>) -> Self {
        Self {
            service,
            definition: FunctionDefinition {
                name: "set_goal".to_string(),
                description: "Set or replace the user's current goal.".to_string(),
                parameters: vec![
                    ParameterSpec {
                        name: "goal_type".to_string(),
                        description: "Kind of goal".to_string(),
                        param_type: ParameterType::Enumeration {
                            values: GOAL_TYPES.iter().map(|s| (*s).to_string()).collect(),
                        },
                        required: true,
                    },
                    string_param("target", "Target description (e.g., '185 lbs by June')", true),
                ],
            },
        }
    }
}

impl<G: GoalService> FunctionExecutor for SetGoalExecutor<G> {
    fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: &ArgumentMap,
        ctx: &RequestContext,
    ) -> Result<FunctionValue, FunctionErrorKind> {
        let request = GoalRequest {
            goal_type: args.require_enum("goal_type", &GOAL_TYPES)?.to_string(),
            target: args.require_str("target")?.to_string(),
        };
        let data = self
            .service
            .set_goal(&ctx.user_id, request)
            .await
            .map_err(execution_failed)?;
        Ok(FunctionValue::Json(data))
    }
}

pub struct TrackProgressExecutor<G: GoalService> {
    service: Arc<G>,
    definition: FunctionDefinition,
}

impl<G: GoalService> TrackProgressExecutor<G> {
    pub fn new(service: Arc<G>) -> Self {
        Self {
            service,
            definition: FunctionDefinition {
                name: "track_goal_progress".to_string(),
                description: "Report progress toward the user's current goal.".to_string(),
                parameters: vec![],
            },
        }
    }
}

impl<G: GoalService> FunctionExecutor for TrackProgressExecutor<G> {
    fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        _args: &ArgumentMap,
        ctx: &RequestContext,
    ) -> Result<FunctionValue, FunctionErrorKind> {
        let data = self
            .service
            .track_progress(&ctx.user_id)
            .await
            .map_err(execution_failed)?;
        Ok(FunctionValue::Json(data))
    }
}

// ---------------------------------------------------------------------------
// Registry assembly
// ---------------------------------------------------------------------------

/// Build the full built-in registry over the given domain services.
pub fn builtin_registry<W, N, R, G, I>(
    workouts: Arc<W>,
    nutrition: Arc<N>,
    recovery: Arc<R>,
    goals: Arc<G>,
    insights: Arc<I>,
) -> FunctionRegistry
where
    W: WorkoutService + 'static,
    N: NutritionService + 'static,
    R: RecoveryService + 'static,
    G: GoalService + 'static,
    I: InsightService + 'static,
{
    let mut registry = FunctionRegistry::new();
    registry.register(BoxFunctionExecutor::new(QueryWorkoutsExecutor::new(
        Arc::clone(&workouts),
    )));
    registry.register(BoxFunctionExecutor::new(QueryNutritionExecutor::new(
        nutrition,
    )));
    registry.register(BoxFunctionExecutor::new(QueryRecoveryExecutor::new(
        recovery,
    )));
    registry.register(BoxFunctionExecutor::new(QueryInsightsExecutor::new(
        insights,
    )));
    registry.register(BoxFunctionExecutor::new(GeneratePlanExecutor::new(
        Arc::clone(&workouts),
    )));
    registry.register(BoxFunctionExecutor::new(AdjustPlanExecutor::new(workouts)));
    registry.register(BoxFunctionExecutor::new(SetGoalExecutor::new(Arc::clone(
        &goals,
    ))));
    registry.register(BoxFunctionExecutor::new(TrackProgressExecutor::new(goals)));
    registry
}
