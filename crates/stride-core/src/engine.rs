//! Per-turn coaching loop tying the components together.
//!
//! One `handle_turn` call covers a full user turn: persist the user
//! message, route it, assemble the persona prompt, generate through the
//! cache-fronted orchestrator, dispatch at most one model-requested
//! function call (feeding its result back for a follow-up generation),
//! persist the assistant reply, and update the conversation's chain
//! state.
//!
//! Provider exhaustion degrades to an honest user-visible message
//! instead of an error; dispatch failures are surfaced to the model as
//! structured text, never thrown. Snapshot and profile lookups degrade
//! to neutral defaults so prompt assembly is always best-effort.

use chrono::Utc;
use tracing::{info, warn};

use stride_observe::genai_attrs;
use stride_types::error::OrchestratorError;
use stride_types::function::{ArgumentMap, FunctionDefinition, FunctionExecutionResult};
use stride_types::llm::{ChatMessage, CompletionRequest, MessageRole, TaskCategory};
use stride_types::message::{FunctionCallRecord, MessageType};
use stride_types::persona::{HealthSnapshot, PersonaMode, UserGoal};
use stride_types::routing::ProcessingRoute;

use crate::cache::CacheStore;
use crate::context::{ProfileProvider, SnapshotProvider};
use crate::conversation::{ConversationRepository, ConversationService};
use crate::dispatch::FunctionDispatcher;
use crate::llm::LlmOrchestrator;
use crate::persona::{PersonaEngine, PromptRequest};
use crate::request_context::RequestContext;
use crate::router::ContextRouter;

/// Model parameters for the coaching generations.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    /// Messages fetched from the store when building prompt history.
    pub history_fetch_limit: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 1024,
            temperature: Some(0.7),
            history_fetch_limit: 20,
        }
    }
}

/// What one user turn produced.
#[derive(Debug)]
pub struct TurnOutcome {
    /// The reply shown to the user.
    pub reply: String,
    pub route: ProcessingRoute,
    pub message_type: MessageType,
    /// Result of the dispatched function, when the model requested one.
    pub function_result: Option<FunctionExecutionResult>,
    /// True when every provider failed and `reply` is the degraded message.
    pub degraded: bool,
    /// True when the reply came from the response cache.
    pub cached: bool,
    /// Upstream cost of this turn in USD (all generations summed).
    pub estimated_cost: f64,
}

/// The orchestration core's entry point for one user turn.
pub struct CoachEngine<R, S, SP, PP>
where
    R: ConversationRepository,
    S: CacheStore,
    SP: SnapshotProvider,
    PP: ProfileProvider,
{
    conversations: ConversationService<R>,
    router: ContextRouter,
    persona: PersonaEngine,
    dispatcher: FunctionDispatcher,
    orchestrator: LlmOrchestrator<S>,
    snapshots: SP,
    profiles: PP,
    settings: GenerationSettings,
}

impl<R, S, SP, PP> CoachEngine<R, S, SP, PP>
where
    R: ConversationRepository,
    S: CacheStore,
    SP: SnapshotProvider,
    PP: ProfileProvider,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversations: ConversationService<R>,
        router: ContextRouter,
        persona: PersonaEngine,
        dispatcher: FunctionDispatcher,
        orchestrator: LlmOrchestrator<S>,
        snapshots: SP,
        profiles: PP,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            conversations,
            router,
            persona,
            dispatcher,
            orchestrator,
            snapshots,
            profiles,
            settings,
        }
    }

    pub fn conversations(&self) -> &ConversationService<R> {
        &self.conversations
    }

    pub fn router(&self) -> &ContextRouter {
        &self.router
    }

    pub fn dispatcher(&self) -> &FunctionDispatcher {
        &self.dispatcher
    }

    /// Process one user turn end to end.
    ///
    /// Store errors (already retried once by the service) propagate;
    /// everything downstream of persistence degrades instead of failing
    /// the turn.
    pub async fn handle_turn(
        &self,
        ctx: &RequestContext,
        text: &str,
    ) -> anyhow::Result<TurnOutcome> {
        let message_type = self.router.classify(text);
        let user_message = self
            .conversations
            .save_user_message(
                ctx.user_id,
                ctx.conversation_id,
                text.to_string(),
                message_type.clone(),
            )
            .await?;

        let chain = self.router.chain_snapshot(ctx.conversation_id).await;
        let route = {
            let _span = tracing::info_span!(
                "route_turn",
                gen_ai.operation.name = genai_attrs::OP_ROUTE,
                conversation_id = %ctx.conversation_id,
            )
            .entered();
            self.router.route(text, &chain)
        };
        info!(%route, message_type = %message_type, "Turn routed");

        let (mode, goal, snapshot) = self.load_profile_context(ctx).await;
        let history: Vec<_> = self
            .conversations
            .recent_messages(
                &ctx.user_id,
                &ctx.conversation_id,
                self.settings.history_fetch_limit,
            )
            .await?
            .into_iter()
            .filter(|m| m.id != user_message.id)
            .collect();

        let manifest: Vec<&FunctionDefinition> = if self.router.includes_manifest(route) {
            self.dispatcher.registry().manifest()
        } else {
            Vec::new()
        };
        let prompt = self.persona.build(&PromptRequest {
            mode,
            goal: goal.as_ref(),
            snapshot: &snapshot,
            history: &history,
            functions: (!manifest.is_empty()).then_some(manifest.as_slice()),
            now: Utc::now(),
        });

        let task = if route == ProcessingRoute::DirectAi && message_type == MessageType::Command {
            TaskCategory::Parsing
        } else {
            TaskCategory::Conversation
        };
        let tags = vec![format!("persona:{mode}")];

        let request = self.request(prompt.system.clone(), vec![user_chat(text)]);
        let first = match self.orchestrator.generate(&request, task, &tags, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => return self.degrade(ctx, route, message_type, e).await,
        };

        let mut estimated_cost = first.estimated_cost;
        let mut cached = first.cached;

        // At most one function call per response is honored
        let Some((function_name, arguments)) = parse_function_call(&first.response.content) else {
            let reply = first.response.content.clone();
            self.conversations
                .save_assistant_message(
                    ctx.user_id,
                    ctx.conversation_id,
                    reply.clone(),
                    None,
                    first.response.usage.output_tokens,
                    first.estimated_cost,
                )
                .await?;
            self.router.after_turn(ctx.conversation_id, None).await;
            return Ok(TurnOutcome {
                reply,
                route,
                message_type,
                function_result: None,
                degraded: false,
                cached,
                estimated_cost,
            });
        };

        let function_result = self
            .dispatcher
            .dispatch(
                &function_name,
                ArgumentMap::from_value(arguments.clone()),
                ctx,
            )
            .await;
        let result_text = function_result.to_model_text();

        self.conversations
            .save_function_message(
                ctx.user_id,
                ctx.conversation_id,
                &function_name,
                result_text.clone(),
            )
            .await?;

        // Feed the result back for one follow-up generation. The model
        // sees its own call plus the structured result (or failure) and
        // produces the user-facing reply.
        let followup_request = self.request(
            prompt.system,
            vec![
                user_chat(text),
                assistant_chat(&first.response.content),
                user_chat(&format!(
                    "Result of {function_name}:\n{result_text}\n\nAnswer the user with this data."
                )),
            ],
        );
        let reply = match self
            .orchestrator
            .generate(&followup_request, TaskCategory::Conversation, &tags, ctx)
            .await
        {
            Ok(followup) => {
                estimated_cost += followup.estimated_cost;
                cached = cached && followup.cached;
                self.conversations
                    .save_assistant_message(
                        ctx.user_id,
                        ctx.conversation_id,
                        followup.response.content.clone(),
                        Some(FunctionCallRecord {
                            name: function_name.clone(),
                            arguments,
                        }),
                        first.response.usage.output_tokens + followup.response.usage.output_tokens,
                        estimated_cost,
                    )
                    .await?;
                followup.response.content
            }
            Err(e) => {
                // The function already ran; only the narration is lost
                warn!(error = %e, "Follow-up generation failed after dispatch");
                let degraded = e.degraded_message();
                self.conversations
                    .save_assistant_message(
                        ctx.user_id,
                        ctx.conversation_id,
                        degraded.clone(),
                        Some(FunctionCallRecord {
                            name: function_name.clone(),
                            arguments,
                        }),
                        first.response.usage.output_tokens,
                        estimated_cost,
                    )
                    .await?;
                degraded
            }
        };

        let executed = function_result.success.then(|| function_name.as_str());
        self.router.after_turn(ctx.conversation_id, executed).await;

        Ok(TurnOutcome {
            reply,
            route,
            message_type,
            function_result: Some(function_result),
            degraded: false,
            cached,
            estimated_cost,
        })
    }

    /// Resolve persona, goal, and health snapshot, degrading to neutral
    /// defaults when a collaborator fails. Prompt assembly never blocks
    /// on collaborator availability.
    async fn load_profile_context(
        &self,
        ctx: &RequestContext,
    ) -> (PersonaMode, Option<UserGoal>, HealthSnapshot) {
        let mode = match self.profiles.persona_mode(&ctx.user_id).await {
            Ok(mode) => mode,
            Err(e) => {
                warn!(error = %e, "Persona lookup failed, using default");
                PersonaMode::Encourager
            }
        };
        let goal = match self.profiles.user_goal(&ctx.user_id).await {
            Ok(goal) => goal,
            Err(e) => {
                warn!(error = %e, "Goal lookup failed, omitting goal block");
                None
            }
        };
        let snapshot = match self.snapshots.current_snapshot(&ctx.user_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Health snapshot unavailable, using neutral");
                HealthSnapshot::neutral(Utc::now())
            }
        };
        (mode, goal, snapshot)
    }

    /// Persist and return the degraded-mode reply after provider exhaustion.
    async fn degrade(
        &self,
        ctx: &RequestContext,
        route: ProcessingRoute,
        message_type: MessageType,
        error: OrchestratorError,
    ) -> anyhow::Result<TurnOutcome> {
        if matches!(error, OrchestratorError::Cancelled) {
            return Err(error.into());
        }
        warn!(error = %error, "Generation exhausted all providers, degrading");
        let reply = error.degraded_message();
        self.conversations
            .save_assistant_message(ctx.user_id, ctx.conversation_id, reply.clone(), None, 0, 0.0)
            .await?;
        self.router.after_turn(ctx.conversation_id, None).await;
        Ok(TurnOutcome {
            reply,
            route,
            message_type,
            function_result: None,
            degraded: true,
            cached: false,
            estimated_cost: 0.0,
        })
    }

    fn request(&self, system: String, messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest {
            model: self.settings.model.clone(),
            messages,
            system: Some(system),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            stream: false,
            stop_sequences: None,
        }
    }
}

fn user_chat(content: &str) -> ChatMessage {
    ChatMessage {
        role: MessageRole::User,
        content: content.to_string(),
    }
}

fn assistant_chat(content: &str) -> ChatMessage {
    ChatMessage {
        role: MessageRole::Assistant,
        content: content.to_string(),
    }
}

/// Parse the first `<function_call name="...">{json}</function_call>`
/// block from a model response.
///
/// Parsing is lenient: an empty or malformed JSON body degrades to null
/// arguments (the dispatcher's typed extraction reports missing fields
/// properly). Only the first block is honored.
pub fn parse_function_call(response: &str) -> Option<(String, serde_json::Value)> {
    let start_idx = response.find("<function_call")?;
    let rest = &response[start_idx..];

    let name_prefix = r#"name=""#;
    let name_start = rest.find(name_prefix)? + name_prefix.len();
    let name_end = rest[name_start..].find('"')?;
    let name = rest[name_start..name_start + name_end].trim();
    if name.is_empty() {
        return None;
    }

    let body_start = rest.find('>')? + 1;
    let body_end = rest.find("</function_call>")?;
    if body_end < body_start {
        return None;
    }
    let body = rest[body_start..body_end].trim();

    let arguments = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(body).unwrap_or(serde_json::Value::Null)
    };

    Some((name.to_string(), arguments))
}

/// Text preceding the function call block, trimmed. The full response
/// when there is no block.
pub fn text_before_call(response: &str) -> &str {
    match response.find("<function_call") {
        Some(idx) => response[..idx].trim(),
        None => response.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::dispatch::executor::{BoxFunctionExecutor, FunctionExecutor};
    use crate::dispatch::FunctionRegistry;
    use crate::llm::box_provider::BoxLlmProvider;
    use crate::llm::fallback::FallbackChain;
    use crate::llm::provider::LlmProvider;
    use dashmap::DashMap;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use stride_types::cache::{CacheEntry, CacheError};
    use stride_types::config::PromptConfig;
    use stride_types::error::RepositoryError;
    use stride_types::llm::{
        CompletionResponse, FallbackChainConfig, LlmError, ProviderCapabilities, ProviderConfig,
        ProviderType, StopReason, StreamEvent, Usage,
    };
    use stride_types::message::{ConversationStats, Message, Role};
    use stride_types::routing::RouterConfig;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    // --- Parser tests ---

    #[test]
    fn test_parse_function_call_with_args() {
        let response = r#"Let me check your history.

<function_call name="query_workouts">{"days": 7, "exercise": "bench press"}</function_call>"#;
        let (name, args) = parse_function_call(response).unwrap();
        assert_eq!(name, "query_workouts");
        assert_eq!(args["days"], 7);
        assert_eq!(args["exercise"], "bench press");
        assert_eq!(text_before_call(response), "Let me check your history.");
    }

    #[test]
    fn test_parse_function_call_empty_body() {
        let response = r#"<function_call name="track_goal_progress"></function_call>"#;
        let (name, args) = parse_function_call(response).unwrap();
        assert_eq!(name, "track_goal_progress");
        assert!(args.is_null());
    }

    #[test]
    fn test_parse_no_block_returns_none() {
        assert!(parse_function_call("Plain reply, no calls here.").is_none());
    }

    #[test]
    fn test_parse_malformed_json_degrades_to_null() {
        let response = r#"<function_call name="set_goal">{not json}</function_call>"#;
        let (name, args) = parse_function_call(response).unwrap();
        assert_eq!(name, "set_goal");
        assert!(args.is_null());
    }

    #[test]
    fn test_parse_only_first_block_honored() {
        let response = r#"<function_call name="first">{}</function_call>
<function_call name="second">{}</function_call>"#;
        let (name, _) = parse_function_call(response).unwrap();
        assert_eq!(name, "first");
    }

    // --- Turn-loop fixtures ---

    #[derive(Default)]
    struct MemRepo {
        messages: Mutex<Vec<Message>>,
    }

    impl ConversationRepository for Arc<MemRepo> {
        async fn save_message(&self, message: &Message) -> Result<(), RepositoryError> {
            self.messages.lock().await.push(message.clone());
            Ok(())
        }

        async fn recent_messages(
            &self,
            user_id: &Uuid,
            conversation_id: &Uuid,
            limit: u32,
        ) -> Result<Vec<Message>, RepositoryError> {
            let messages = self.messages.lock().await;
            let mut matching: Vec<Message> = messages
                .iter()
                .filter(|m| m.user_id == *user_id && m.conversation_id == *conversation_id)
                .cloned()
                .collect();
            matching.sort_by_key(|m| m.created_at);
            let start = matching.len().saturating_sub(limit as usize);
            Ok(matching[start..].to_vec())
        }

        async fn stats(
            &self,
            _user_id: &Uuid,
            _conversation_id: &Uuid,
        ) -> Result<ConversationStats, RepositoryError> {
            Ok(ConversationStats::default())
        }

        async fn conversation_ids(&self, _user_id: &Uuid) -> Result<Vec<Uuid>, RepositoryError> {
            Ok(vec![])
        }

        async fn prune_old_conversations(
            &self,
            _user_id: &Uuid,
            _keep_last: u32,
        ) -> Result<u64, RepositoryError> {
            Ok(0)
        }

        async fn set_message_type(
            &self,
            _user_id: &Uuid,
            _message_id: &Uuid,
            _message_type: MessageType,
        ) -> Result<(), RepositoryError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemStore {
        entries: DashMap<String, CacheEntry>,
    }

    impl CacheStore for MemStore {
        async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
            Ok(self.entries.get(key).map(|e| e.clone()))
        }

        async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
            self.entries.insert(entry.key.clone(), entry.clone());
            Ok(())
        }

        async fn remove(&self, key: &str) -> Result<(), CacheError> {
            self.entries.remove(key);
            Ok(())
        }

        async fn invalidate_tag(&self, tag: &str) -> Result<u64, CacheError> {
            let before = self.entries.len();
            self.entries
                .retain(|_, entry| !entry.tags.iter().any(|t| t == tag));
            Ok((before - self.entries.len()) as u64)
        }

        async fn purge_expired(&self) -> Result<u64, CacheError> {
            Ok(0)
        }
    }

    /// Provider replaying a scripted sequence of responses.
    struct ScriptedProvider {
        caps: ProviderCapabilities,
        script: Arc<StdMutex<VecDeque<Result<String, ()>>>>,
    }

    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn capabilities(&self) -> &ProviderCapabilities {
            &self.caps
        }

        fn complete(
            &self,
            request: &CompletionRequest,
        ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send
        {
            let next = self
                .script
                .lock()
                .expect("script lock poisoned")
                .pop_front();
            let model = request.model.clone();
            async move {
                match next {
                    Some(Ok(content)) => Ok(CompletionResponse {
                        id: "resp".to_string(),
                        content,
                        model,
                        stop_reason: StopReason::EndTurn,
                        usage: Usage {
                            input_tokens: 100,
                            output_tokens: 50,
                        },
                    }),
                    _ => Err(LlmError::Provider {
                        message: "provider down".to_string(),
                    }),
                }
            }
        }

        fn stream(
            &self,
            _request: CompletionRequest,
        ) -> Pin<Box<dyn futures_util::Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>
        {
            Box::pin(async_stream::stream! {
                yield Ok(StreamEvent::Done);
            })
        }

        fn count_tokens(
            &self,
            _request: &CompletionRequest,
        ) -> impl std::future::Future<Output = Result<stride_types::llm::TokenCount, LlmError>> + Send
        {
            async { Ok(stride_types::llm::TokenCount { input_tokens: 100 }) }
        }
    }

    struct RecoveryExecutor {
        definition: stride_types::function::FunctionDefinition,
        calls: Arc<StdMutex<u32>>,
    }

    impl FunctionExecutor for RecoveryExecutor {
        fn definition(&self) -> &stride_types::function::FunctionDefinition {
            &self.definition
        }

        async fn execute(
            &self,
            args: &ArgumentMap,
            _ctx: &RequestContext,
        ) -> Result<stride_types::function::FunctionValue, stride_types::function::FunctionErrorKind>
        {
            *self.calls.lock().expect("calls lock poisoned") += 1;
            let days = args.i64_clamped("days", 7, 30, 14)?;
            Ok(stride_types::function::FunctionValue::Json(
                json!({"days": days, "sleep_avg": 7.1}),
            ))
        }
    }

    struct StaticSnapshots;

    impl SnapshotProvider for StaticSnapshots {
        async fn current_snapshot(&self, _user_id: &Uuid) -> anyhow::Result<HealthSnapshot> {
            Ok(HealthSnapshot::neutral(Utc::now()))
        }
    }

    struct StaticProfiles;

    impl ProfileProvider for StaticProfiles {
        async fn persona_mode(&self, _user_id: &Uuid) -> anyhow::Result<PersonaMode> {
            Ok(PersonaMode::Strategist)
        }

        async fn user_goal(&self, _user_id: &Uuid) -> anyhow::Result<Option<UserGoal>> {
            Ok(Some(UserGoal {
                summary: "Bench 225 by fall".to_string(),
                target_date: None,
            }))
        }
    }

    fn caps() -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: true,
            max_context_tokens: 200_000,
            max_output_tokens: 8_192,
        }
    }

    struct Fixture {
        engine: CoachEngine<Arc<MemRepo>, MemStore, StaticSnapshots, StaticProfiles>,
        repo: Arc<MemRepo>,
        dispatch_calls: Arc<StdMutex<u32>>,
    }

    fn fixture(script: Vec<Result<String, ()>>) -> Fixture {
        let repo = Arc::new(MemRepo::default());
        let conversations =
            ConversationService::new(Arc::clone(&repo), Duration::from_millis(1));

        let dispatch_calls = Arc::new(StdMutex::new(0));
        let mut registry = FunctionRegistry::new();
        registry.register(BoxFunctionExecutor::new(RecoveryExecutor {
            definition: stride_types::function::FunctionDefinition {
                name: "query_recovery".to_string(),
                description: "Query recovery metrics".to_string(),
                parameters: vec![],
            },
            calls: Arc::clone(&dispatch_calls),
        }));
        let dispatcher = FunctionDispatcher::new(registry, Duration::from_secs(5));

        let config = FallbackChainConfig {
            providers: vec![ProviderConfig {
                name: "scripted".to_string(),
                provider_type: ProviderType::Anthropic,
                api_key_secret_name: None,
                base_url: None,
                model: "test-model".to_string(),
                priority: 0,
                enabled: true,
                capabilities: caps(),
            }],
            request_timeout_ms: 5_000,
            rate_limit_queue_timeout_ms: 100,
            cost_warning_multiplier: 3.0,
        };
        let providers = vec![BoxLlmProvider::new(ScriptedProvider {
            caps: caps(),
            script: Arc::new(StdMutex::new(script.into_iter().collect())),
        })];
        let chain = FallbackChain::new(config, providers, HashMap::new());
        let orchestrator = LlmOrchestrator::new(
            chain,
            ResponseCache::new(MemStore::default()),
            Duration::from_secs(300),
        );

        let engine = CoachEngine::new(
            conversations,
            ContextRouter::new(RouterConfig::default()),
            PersonaEngine::new(PromptConfig::default()),
            dispatcher,
            orchestrator,
            StaticSnapshots,
            StaticProfiles,
            GenerationSettings {
                model: "test-model".to_string(),
                ..GenerationSettings::default()
            },
        );

        Fixture {
            engine,
            repo,
            dispatch_calls,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Uuid::now_v7(), Uuid::now_v7())
    }

    #[tokio::test]
    async fn test_direct_command_turn_skips_dispatcher() {
        let f = fixture(vec![Ok("Logged: 2 eggs, 140 kcal.".to_string())]);
        let ctx = ctx();

        let outcome = f.engine.handle_turn(&ctx, "log 2 eggs").await.unwrap();
        assert_eq!(outcome.route, ProcessingRoute::DirectAi);
        assert_eq!(outcome.message_type, MessageType::Command);
        assert_eq!(outcome.reply, "Logged: 2 eggs, 140 kcal.");
        assert!(outcome.function_result.is_none());
        assert_eq!(*f.dispatch_calls.lock().unwrap(), 0);

        // User + assistant messages persisted in order
        let messages = f.repo.messages.lock().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].message_type, MessageType::Command);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_function_call_turn_dispatches_and_follows_up() {
        let f = fixture(vec![
            Ok(r#"<function_call name="query_recovery">{"days": 10}</function_call>"#.to_string()),
            Ok("Your sleep has averaged 7.1h over 10 days; recovery looks solid.".to_string()),
        ]);
        let ctx = ctx();

        let outcome = f
            .engine
            .handle_turn(&ctx, "analyze my recovery and adjust the plan if needed")
            .await
            .unwrap();
        assert_eq!(outcome.route, ProcessingRoute::FunctionCalling);
        assert!(outcome.reply.contains("7.1h"));
        let result = outcome.function_result.unwrap();
        assert!(result.success);
        assert_eq!(result.function_name, "query_recovery");
        assert_eq!(*f.dispatch_calls.lock().unwrap(), 1);

        // Workflow chain is now active
        let chain = f.engine.router().chain_snapshot(ctx.conversation_id).await;
        assert!(chain.workflow_active);
        assert_eq!(chain.recent_function_names, vec!["query_recovery"]);

        // user, function output, assistant -- three persisted messages
        let messages = f.repo.messages.lock().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::Function);
        assert!(messages[1].content.contains("sleep_avg"));
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(
            messages[2].function_call.as_ref().unwrap().name,
            "query_recovery"
        );
    }

    #[tokio::test]
    async fn test_unknown_function_surfaces_to_model_not_thrown() {
        let f = fixture(vec![
            Ok(r#"<function_call name="teleport_user">{}</function_call>"#.to_string()),
            Ok("I can't do that, but here's what I can help with.".to_string()),
        ]);
        let ctx = ctx();

        let outcome = f
            .engine
            .handle_turn(&ctx, "plan my next training block")
            .await
            .unwrap();
        let result = outcome.function_result.unwrap();
        assert!(!result.success);

        // The failure reached the model as structured text
        let messages = f.repo.messages.lock().await;
        let function_msg = messages.iter().find(|m| m.role == Role::Function).unwrap();
        assert!(function_msg.content.contains("teleport_user"));
        assert!(function_msg.content.contains("failed"));

        // Failed dispatch does not activate the workflow chain
        let chain = f.engine.router().chain_snapshot(ctx.conversation_id).await;
        assert!(!chain.workflow_active);
    }

    #[tokio::test]
    async fn test_provider_exhaustion_degrades() {
        let f = fixture(vec![Err(())]);
        let ctx = ctx();

        let outcome = f.engine.handle_turn(&ctx, "how am I doing").await.unwrap();
        assert!(outcome.degraded);
        assert!(!outcome.reply.is_empty());
        assert!((outcome.estimated_cost - 0.0).abs() < f64::EPSILON);

        // The user message stayed persisted, plus the degraded reply
        let messages = f.repo.messages.lock().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, outcome.reply);
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let f = fixture(vec![Ok("never read".to_string())]);
        let ctx = ctx();
        ctx.cancel();

        let err = f.engine.handle_turn(&ctx, "hello").await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_identical_turns_share_cached_response() {
        // One scripted response only: the second turn (fresh
        // conversation, identical message and prompt inputs) must be
        // served from the cache rather than the provider.
        let f = fixture(vec![Ok("You're consistent and trending up.".to_string())]);

        let first = f
            .engine
            .handle_turn(&ctx(), "tell me about my consistency lately")
            .await
            .unwrap();
        assert!(!first.cached);

        let second = f
            .engine
            .handle_turn(&ctx(), "tell me about my consistency lately")
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(second.reply, first.reply);
    }
}
