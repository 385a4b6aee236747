//! Processing-route decisions for incoming messages.
//!
//! The route classifier is a pure function of the message text and the
//! conversation's chain context, evaluated in priority order: an active
//! workflow wins, then complex-workflow signals, then simple-parsing
//! signals, and everything ambiguous degrades to hybrid. Routing never
//! fails.
//!
//! Chain state is owned here, one entry per conversation behind its own
//! lock: concurrent turns of the same conversation should not happen by
//! design, but per-conversation exclusive access defends against them
//! anyway.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use stride_types::routing::{ChainContext, ProcessingRoute, RouterConfig};

/// Chooses the processing route for each user turn and tracks chain
/// state across turns of a conversation.
pub struct ContextRouter {
    config: RouterConfig,
    chains: DashMap<Uuid, Arc<Mutex<ChainContext>>>,
}

impl ContextRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            chains: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Decide the route for a message given the current chain context.
    ///
    /// Pure: the same `(message, context)` pair always yields the same
    /// route. Priority order, first match wins.
    pub fn route(&self, message: &str, context: &ChainContext) -> ProcessingRoute {
        // 1. Preserve an in-progress multi-step workflow
        if context.workflow_active
            && context.chain_probability > self.config.chain_probability_threshold
        {
            return ProcessingRoute::FunctionCalling;
        }

        // 2. Complex-workflow signals, regardless of message length
        if self.matches_complex_signal(message) {
            return ProcessingRoute::FunctionCalling;
        }

        // 3. Simple-parsing signals: short message with an action-verb
        //    prefix, or a short bounded question
        if self.matches_simple_signal(message) {
            return ProcessingRoute::DirectAi;
        }

        // 4. Ambiguity degrades to hybrid, never to an error
        ProcessingRoute::Hybrid
    }

    fn matches_complex_signal(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        self.config
            .complex_keywords
            .iter()
            .any(|keyword| lower.contains(keyword.as_str()))
    }

    fn matches_simple_signal(&self, message: &str) -> bool {
        let trimmed = message.trim();
        if trimmed.len() > self.config.simple_max_chars {
            return false;
        }
        let lower = trimmed.to_lowercase();

        let action_prefixed = self
            .config
            .action_verbs
            .iter()
            .any(|verb| lower.starts_with(verb.as_str()));
        if action_prefixed {
            return true;
        }

        // A short, clearly bounded question ("how much protein today?")
        lower.ends_with('?') && trimmed.split_whitespace().count() <= 8
    }

    /// Late-bound message classification: short action-verb messages are
    /// commands, everything else is conversation.
    pub fn classify(&self, message: &str) -> stride_types::message::MessageType {
        let trimmed = message.trim();
        let lower = trimmed.to_lowercase();
        let is_command = trimmed.len() <= self.config.simple_max_chars
            && self
                .config
                .action_verbs
                .iter()
                .any(|verb| lower.starts_with(verb.as_str()));
        if is_command {
            stride_types::message::MessageType::Command
        } else {
            stride_types::message::MessageType::Conversation
        }
    }

    /// Whether the given route should carry the function manifest in its
    /// prompt.
    pub fn includes_manifest(&self, route: ProcessingRoute) -> bool {
        match route {
            ProcessingRoute::FunctionCalling => true,
            ProcessingRoute::DirectAi => false,
            ProcessingRoute::Hybrid => self.config.hybrid_includes_manifest,
        }
    }

    /// Snapshot the chain context for a conversation.
    ///
    /// Call before routing; the snapshot keeps `route()` pure while the
    /// live entry stays behind its per-conversation lock.
    pub async fn chain_snapshot(&self, conversation_id: Uuid) -> ChainContext {
        let entry = self.chain_entry(conversation_id);
        let guard = entry.lock().await;
        guard.clone()
    }

    /// Update chain state after a turn completes.
    ///
    /// A function execution pushes its name (bounded list, oldest
    /// dropped) and raises the chain probability toward 1.0; a
    /// function-free turn decays it toward 0 and, after the configured
    /// number of quiet turns, clears the workflow flag.
    pub async fn after_turn(&self, conversation_id: Uuid, executed_function: Option<&str>) {
        let entry = self.chain_entry(conversation_id);
        let mut chain = entry.lock().await;

        match executed_function {
            Some(name) => {
                chain.recent_function_names.push(name.to_string());
                while chain.recent_function_names.len() > self.config.max_recent_functions {
                    chain.recent_function_names.remove(0);
                }
                chain.chain_probability =
                    (chain.chain_probability + self.config.chain_increase).min(1.0);
                chain.workflow_active = true;
                chain.turns_since_function = 0;
            }
            None => {
                chain.turns_since_function += 1;
                chain.chain_probability =
                    (chain.chain_probability - self.config.chain_decay).max(0.0);
                if chain.turns_since_function >= self.config.decay_turns {
                    chain.workflow_active = false;
                }
            }
        }

        debug!(
            %conversation_id,
            chain_probability = chain.chain_probability,
            workflow_active = chain.workflow_active,
            "Chain context updated"
        );
    }

    /// Drop the chain state for a conversation (e.g., when pruned).
    pub fn forget_conversation(&self, conversation_id: &Uuid) {
        self.chains.remove(conversation_id);
    }

    fn chain_entry(&self, conversation_id: Uuid) -> Arc<Mutex<ChainContext>> {
        self.chains
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(Mutex::new(ChainContext::default())))
            .clone()
    }
}
