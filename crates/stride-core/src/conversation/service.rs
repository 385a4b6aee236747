//! Conversation service: message construction, per-conversation write
//! serialization, and transient-error retry.
//!
//! Writes to the same `(user_id, conversation_id)` pair are serialized
//! through a per-key async mutex so concurrent turns cannot interleave
//! history; reads and writes to different conversations proceed fully
//! concurrently. Transient store errors are retried once with a
//! configured backoff before propagating.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use stride_types::error::RepositoryError;
use stride_types::message::{
    ConversationStats, FunctionCallRecord, Message, MessageType, Role,
};

use super::repository::ConversationRepository;

/// Orchestrates conversation persistence over a repository.
///
/// Generic over `ConversationRepository` so core never depends on
/// stride-infra.
pub struct ConversationService<R: ConversationRepository> {
    repo: R,
    retry_backoff: Duration,
    write_locks: DashMap<(Uuid, Uuid), Arc<Mutex<()>>>,
}

impl<R: ConversationRepository> ConversationService<R> {
    pub fn new(repo: R, retry_backoff: Duration) -> Self {
        Self {
            repo,
            retry_backoff,
            write_locks: DashMap::new(),
        }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    fn write_lock(&self, user_id: Uuid, conversation_id: Uuid) -> Arc<Mutex<()>> {
        self.write_locks
            .entry((user_id, conversation_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run a repository call, retrying once with backoff on transient errors.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, RepositoryError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RepositoryError>>,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Transient store error, retrying once");
                tokio::time::sleep(self.retry_backoff).await;
                op().await
            }
            Err(e) => Err(e),
        }
    }

    // --- Message persistence ---

    /// Save a user message, classified as `Command` or `Conversation`.
    pub async fn save_user_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        content: String,
        message_type: MessageType,
    ) -> Result<Message, RepositoryError> {
        let message = Message {
            id: Uuid::now_v7(),
            conversation_id,
            user_id,
            role: Role::User,
            content,
            function_call: None,
            message_type,
            created_at: Utc::now(),
            token_count: None,
            estimated_cost: None,
        };
        self.save_serialized(&message).await?;
        Ok(message)
    }

    /// Save an assistant message with usage and cost metadata.
    #[allow(clippy::too_many_arguments)]
    pub async fn save_assistant_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        content: String,
        function_call: Option<FunctionCallRecord>,
        token_count: u32,
        estimated_cost: f64,
    ) -> Result<Message, RepositoryError> {
        let message = Message {
            id: Uuid::now_v7(),
            conversation_id,
            user_id,
            role: Role::Assistant,
            content,
            function_call,
            message_type: MessageType::Conversation,
            created_at: Utc::now(),
            token_count: Some(token_count),
            estimated_cost: Some(estimated_cost),
        };
        self.save_serialized(&message).await?;
        Ok(message)
    }

    /// Save a function-output message fed back into the conversation.
    pub async fn save_function_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        function_name: &str,
        content: String,
    ) -> Result<Message, RepositoryError> {
        let message = Message {
            id: Uuid::now_v7(),
            conversation_id,
            user_id,
            role: Role::Function,
            content,
            function_call: Some(FunctionCallRecord {
                name: function_name.to_string(),
                arguments: serde_json::Value::Null,
            }),
            message_type: MessageType::Conversation,
            created_at: Utc::now(),
            token_count: None,
            estimated_cost: None,
        };
        self.save_serialized(&message).await?;
        Ok(message)
    }

    async fn save_serialized(&self, message: &Message) -> Result<(), RepositoryError> {
        let lock = self.write_lock(message.user_id, message.conversation_id);
        let _guard = lock.lock().await;
        self.with_retry(|| self.repo.save_message(message)).await
    }

    // --- Reads ---

    /// The most recent `limit` messages, ascending.
    pub async fn recent_messages(
        &self,
        user_id: &Uuid,
        conversation_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        self.with_retry(|| self.repo.recent_messages(user_id, conversation_id, limit))
            .await
    }

    /// Aggregate statistics for a conversation.
    pub async fn stats(
        &self,
        user_id: &Uuid,
        conversation_id: &Uuid,
    ) -> Result<ConversationStats, RepositoryError> {
        self.with_retry(|| self.repo.stats(user_id, conversation_id))
            .await
    }

    /// Conversation ids for a user, most recently active first.
    pub async fn conversation_ids(&self, user_id: &Uuid) -> Result<Vec<Uuid>, RepositoryError> {
        self.with_retry(|| self.repo.conversation_ids(user_id)).await
    }

    /// Prune conversations beyond the `keep_last` most recently active.
    pub async fn prune_old_conversations(
        &self,
        user_id: &Uuid,
        keep_last: u32,
    ) -> Result<u64, RepositoryError> {
        self.with_retry(|| self.repo.prune_old_conversations(user_id, keep_last))
            .await
    }

    /// Reclassify a persisted message.
    pub async fn set_message_type(
        &self,
        user_id: &Uuid,
        message_id: &Uuid,
        message_type: MessageType,
    ) -> Result<(), RepositoryError> {
        self.with_retry(|| {
            self.repo
                .set_message_type(user_id, message_id, message_type.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// In-memory repository that can fail transiently on demand.
    #[derive(Default)]
    struct TestRepo {
        messages: Mutex<Vec<Message>>,
        fail_next: AtomicU32,
    }

    impl TestRepo {
        fn fail_next_n(&self, n: u32) {
            self.fail_next.store(n, Ordering::SeqCst);
        }

        fn maybe_fail(&self) -> Result<(), RepositoryError> {
            let remaining = self.fail_next.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next.store(remaining - 1, Ordering::SeqCst);
                return Err(RepositoryError::Connection);
            }
            Ok(())
        }
    }

    impl ConversationRepository for &TestRepo {
        async fn save_message(&self, message: &Message) -> Result<(), RepositoryError> {
            self.maybe_fail()?;
            self.messages.lock().await.push(message.clone());
            Ok(())
        }

        async fn recent_messages(
            &self,
            user_id: &Uuid,
            conversation_id: &Uuid,
            limit: u32,
        ) -> Result<Vec<Message>, RepositoryError> {
            self.maybe_fail()?;
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
            user_id: &Uuid,
            conversation_id: &Uuid,
        ) -> Result<ConversationStats, RepositoryError> {
            let messages = self.recent_messages(user_id, conversation_id, u32::MAX).await?;
            let mut stats = ConversationStats::default();
            for m in &messages {
                stats.total_messages += 1;
                match m.role {
                    Role::User => stats.user_messages += 1,
                    Role::Assistant => stats.assistant_messages += 1,
                    Role::Function => {}
                }
                stats.total_tokens += u64::from(m.token_count.unwrap_or(0));
                stats.estimated_cost += m.estimated_cost.unwrap_or(0.0);
            }
            stats.first_message_at = messages.first().map(|m| m.created_at);
            stats.last_message_at = messages.last().map(|m| m.created_at);
            Ok(stats)
        }

        async fn conversation_ids(&self, user_id: &Uuid) -> Result<Vec<Uuid>, RepositoryError> {
            let messages = self.messages.lock().await;
            let mut ids: Vec<Uuid> = Vec::new();
            for m in messages.iter().filter(|m| m.user_id == *user_id) {
                if !ids.contains(&m.conversation_id) {
                    ids.push(m.conversation_id);
                }
            }
            Ok(ids)
        }

        async fn prune_old_conversations(
            &self,
            user_id: &Uuid,
            keep_last: u32,
        ) -> Result<u64, RepositoryError> {
            let ids = self.conversation_ids(user_id).await?;
            let stale: Vec<Uuid> = ids.into_iter().skip(keep_last as usize).collect();
            let mut messages = self.messages.lock().await;
            messages.retain(|m| m.user_id != *user_id || !stale.contains(&m.conversation_id));
            Ok(stale.len() as u64)
        }

        async fn set_message_type(
            &self,
            user_id: &Uuid,
            message_id: &Uuid,
            message_type: MessageType,
        ) -> Result<(), RepositoryError> {
            let mut messages = self.messages.lock().await;
            let msg = messages
                .iter_mut()
                .find(|m| m.user_id == *user_id && m.id == *message_id)
                .ok_or(RepositoryError::NotFound)?;
            msg.message_type = message_type;
            Ok(())
        }
    }

    fn service(repo: &TestRepo) -> ConversationService<&TestRepo> {
        ConversationService::new(repo, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_save_and_read_back() {
        let repo = TestRepo::default();
        let svc = service(&repo);
        let user = Uuid::now_v7();
        let conv = Uuid::now_v7();

        svc.save_user_message(user, conv, "log 2 eggs".to_string(), MessageType::Command)
            .await
            .unwrap();
        svc.save_assistant_message(
            user,
            conv,
            "Logged: 2 eggs, 140 kcal, 12g protein.".to_string(),
            None,
            80,
            0.001,
        )
        .await
        .unwrap();

        let messages = svc.recent_messages(&user, &conv, 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].message_type, MessageType::Command);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].token_count, Some(80));
    }

    #[tokio::test]
    async fn test_transient_error_retried_once() {
        let repo = TestRepo::default();
        let svc = service(&repo);
        repo.fail_next_n(1);

        let result = svc
            .save_user_message(
                Uuid::now_v7(),
                Uuid::now_v7(),
                "hello".to_string(),
                MessageType::Conversation,
            )
            .await;
        assert!(result.is_ok(), "single transient failure should be retried");
    }

    #[tokio::test]
    async fn test_persistent_transient_error_propagates() {
        let repo = TestRepo::default();
        let svc = service(&repo);
        repo.fail_next_n(2);

        let result = svc
            .save_user_message(
                Uuid::now_v7(),
                Uuid::now_v7(),
                "hello".to_string(),
                MessageType::Conversation,
            )
            .await;
        assert!(matches!(result, Err(RepositoryError::Connection)));
    }

    #[tokio::test]
    async fn test_function_message_carries_name() {
        let repo = TestRepo::default();
        let svc = service(&repo);
        let user = Uuid::now_v7();
        let conv = Uuid::now_v7();

        let msg = svc
            .save_function_message(user, conv, "query_recovery", "sleep: 7.2h avg".to_string())
            .await
            .unwrap();
        assert_eq!(msg.role, Role::Function);
        assert_eq!(msg.function_call.unwrap().name, "query_recovery");
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_same_conversation_all_land() {
        let repo = Box::leak(Box::new(TestRepo::default()));
        let svc = Arc::new(ConversationService::new(&*repo, Duration::from_millis(1)));
        let user = Uuid::now_v7();
        let conv = Uuid::now_v7();

        let mut handles = Vec::new();
        for i in 0..10 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move {
                svc.save_user_message(
                    user,
                    conv,
                    format!("message {i}"),
                    MessageType::Conversation,
                )
                .await
                .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let messages = svc.recent_messages(&user, &conv, 100).await.unwrap();
        assert_eq!(messages.len(), 10);
    }

    #[tokio::test]
    async fn test_reclassification() {
        let repo = TestRepo::default();
        let svc = service(&repo);
        let user = Uuid::now_v7();
        let conv = Uuid::now_v7();

        let msg = svc
            .save_user_message(user, conv, "log 2 eggs".to_string(), MessageType::Conversation)
            .await
            .unwrap();
        svc.set_message_type(&user, &msg.id, MessageType::Command)
            .await
            .unwrap();

        let messages = svc.recent_messages(&user, &conv, 10).await.unwrap();
        assert_eq!(messages[0].message_type, MessageType::Command);
    }
}
