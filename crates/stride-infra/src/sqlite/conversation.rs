//! SQLite conversation repository implementation.
//!
//! Implements `ConversationRepository` from `stride-core` using sqlx with
//! split read/write pools: raw queries, private Row structs, reader pool
//! for SELECTs and writer pool for mutations. Every query is anchored on
//! the `(user_id, conversation_id, created_at)` index; nothing fetches a
//! user's full history to filter in memory.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use stride_core::conversation::ConversationRepository;
use stride_types::error::RepositoryError;
use stride_types::message::{
    ConversationStats, FunctionCallRecord, Message, MessageType, Role,
};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ConversationRepository`.
pub struct SqliteConversationRepository {
    pool: DatabasePool,
}

impl SqliteConversationRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

/// Internal row type for mapping SQLite rows to domain Message.
struct MessageRow {
    id: String,
    conversation_id: String,
    user_id: String,
    role: String,
    content: String,
    function_call: Option<String>,
    message_type: String,
    created_at: String,
    token_count: Option<i64>,
    estimated_cost: Option<f64>,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            user_id: row.try_get("user_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            function_call: row.try_get("function_call")?,
            message_type: row.try_get("message_type")?,
            created_at: row.try_get("created_at")?,
            token_count: row.try_get("token_count")?,
            estimated_cost: row.try_get("estimated_cost")?,
        })
    }

    fn into_message(self) -> Result<Message, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid message id: {e}")))?;
        let conversation_id = Uuid::parse_str(&self.conversation_id)
            .map_err(|e| RepositoryError::Query(format!("invalid conversation_id: {e}")))?;
        let user_id = Uuid::parse_str(&self.user_id)
            .map_err(|e| RepositoryError::Query(format!("invalid user_id: {e}")))?;
        let role: Role = self
            .role
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let message_type: MessageType = self
            .message_type
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let created_at = parse_datetime(&self.created_at)?;
        let function_call = self
            .function_call
            .as_deref()
            .map(|json| {
                serde_json::from_str::<FunctionCallRecord>(json)
                    .map_err(|e| RepositoryError::Query(format!("invalid function_call: {e}")))
            })
            .transpose()?;

        Ok(Message {
            id,
            conversation_id,
            user_id,
            role,
            content: self.content,
            function_call,
            message_type,
            created_at,
            token_count: self.token_count.map(|v| v as u32),
            estimated_cost: self.estimated_cost,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn map_sqlx_err(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Connection
        }
        other => RepositoryError::Query(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// ConversationRepository implementation
// ---------------------------------------------------------------------------

impl ConversationRepository for SqliteConversationRepository {
    async fn save_message(&self, message: &Message) -> Result<(), RepositoryError> {
        let function_call = message
            .function_call
            .as_ref()
            .map(|fc| {
                serde_json::to_string(fc)
                    .map_err(|e| RepositoryError::Query(format!("function_call encode: {e}")))
            })
            .transpose()?;

        sqlx::query(
            r#"INSERT INTO messages (id, conversation_id, user_id, role, content, function_call, message_type, created_at, token_count, estimated_cost)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(message.id.to_string())
        .bind(message.conversation_id.to_string())
        .bind(message.user_id.to_string())
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(function_call)
        .bind(message.message_type.to_string())
        .bind(format_datetime(&message.created_at))
        .bind(message.token_count.map(|v| v as i64))
        .bind(message.estimated_cost)
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn recent_messages(
        &self,
        user_id: &Uuid,
        conversation_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        // Most recent `limit` via the covering index, then re-sorted
        // ascending for chronological presentation
        let rows = sqlx::query(
            r#"SELECT * FROM messages
               WHERE user_id = ? AND conversation_id = ?
               ORDER BY created_at DESC
               LIMIT ?"#,
        )
        .bind(user_id.to_string())
        .bind(conversation_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx_err)?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let msg_row = MessageRow::from_row(row).map_err(map_sqlx_err)?;
            messages.push(msg_row.into_message()?);
        }
        messages.reverse();

        Ok(messages)
    }

    async fn stats(
        &self,
        user_id: &Uuid,
        conversation_id: &Uuid,
    ) -> Result<ConversationStats, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT COUNT(*) AS total_messages,
                      COALESCE(SUM(CASE WHEN role = 'user' THEN 1 ELSE 0 END), 0) AS user_messages,
                      COALESCE(SUM(CASE WHEN role = 'assistant' THEN 1 ELSE 0 END), 0) AS assistant_messages,
                      COALESCE(SUM(token_count), 0) AS total_tokens,
                      COALESCE(SUM(estimated_cost), 0.0) AS estimated_cost,
                      MIN(created_at) AS first_message_at,
                      MAX(created_at) AS last_message_at
               FROM messages
               WHERE user_id = ? AND conversation_id = ?"#,
        )
        .bind(user_id.to_string())
        .bind(conversation_id.to_string())
        .fetch_one(&self.pool.reader)
        .await
        .map_err(map_sqlx_err)?;

        let total_messages: i64 = row.try_get("total_messages").map_err(map_sqlx_err)?;
        let user_messages: i64 = row.try_get("user_messages").map_err(map_sqlx_err)?;
        let assistant_messages: i64 = row.try_get("assistant_messages").map_err(map_sqlx_err)?;
        let total_tokens: i64 = row.try_get("total_tokens").map_err(map_sqlx_err)?;
        let estimated_cost: f64 = row.try_get("estimated_cost").map_err(map_sqlx_err)?;
        let first_message_at: Option<String> =
            row.try_get("first_message_at").map_err(map_sqlx_err)?;
        let last_message_at: Option<String> =
            row.try_get("last_message_at").map_err(map_sqlx_err)?;

        Ok(ConversationStats {
            total_messages: total_messages as u64,
            user_messages: user_messages as u64,
            assistant_messages: assistant_messages as u64,
            total_tokens: total_tokens as u64,
            estimated_cost,
            first_message_at: first_message_at.as_deref().map(parse_datetime).transpose()?,
            last_message_at: last_message_at.as_deref().map(parse_datetime).transpose()?,
        })
    }

    async fn conversation_ids(&self, user_id: &Uuid) -> Result<Vec<Uuid>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT conversation_id FROM messages
               WHERE user_id = ?
               GROUP BY conversation_id
               ORDER BY MAX(created_at) DESC"#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx_err)?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("conversation_id").map_err(map_sqlx_err)?;
            ids.push(
                Uuid::parse_str(&id)
                    .map_err(|e| RepositoryError::Query(format!("invalid conversation_id: {e}")))?,
            );
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

        // One transaction per conversation: a crash mid-prune leaves
        // whole conversations intact or gone, never half-deleted. The
        // call is idempotent -- re-running deletes nothing new.
        let mut removed = 0u64;
        for conversation_id in stale {
            let mut tx = self.pool.writer.begin().await.map_err(map_sqlx_err)?;
            sqlx::query("DELETE FROM messages WHERE user_id = ? AND conversation_id = ?")
                .bind(user_id.to_string())
                .bind(conversation_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            tx.commit().await.map_err(map_sqlx_err)?;
            removed += 1;
        }

        Ok(removed)
    }

    async fn set_message_type(
        &self,
        user_id: &Uuid,
        message_id: &Uuid,
        message_type: MessageType,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE messages SET message_type = ? WHERE user_id = ? AND id = ?",
        )
        .bind(message_type.to_string())
        .bind(user_id.to_string())
        .bind(message_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::DatabasePool;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        // Leak tempdir so it lives for the test
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn make_message(user_id: Uuid, conversation_id: Uuid, role: Role, content: &str) -> Message {
        Message {
            id: Uuid::now_v7(),
            conversation_id,
            user_id,
            role,
            content: content.to_string(),
            function_call: None,
            message_type: MessageType::Conversation,
            created_at: Utc::now(),
            token_count: None,
            estimated_cost: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_read_roundtrip() {
        let repo = SqliteConversationRepository::new(test_pool().await);
        let user = Uuid::now_v7();
        let conv = Uuid::now_v7();

        let mut msg = make_message(user, conv, Role::Assistant, "Strong session today.");
        msg.function_call = Some(FunctionCallRecord {
            name: "query_workouts".to_string(),
            arguments: serde_json::json!({"days": 7}),
        });
        msg.token_count = Some(120);
        msg.estimated_cost = Some(0.002);
        repo.save_message(&msg).await.unwrap();

        let messages = repo.recent_messages(&user, &conv, 10).await.unwrap();
        assert_eq!(messages.len(), 1);
        let found = &messages[0];
        assert_eq!(found.id, msg.id);
        assert_eq!(found.role, Role::Assistant);
        assert_eq!(found.content, "Strong session today.");
        assert_eq!(found.function_call.as_ref().unwrap().name, "query_workouts");
        assert_eq!(found.token_count, Some(120));
    }

    #[tokio::test]
    async fn test_recent_messages_bounded_and_ascending() {
        let repo = SqliteConversationRepository::new(test_pool().await);
        let user = Uuid::now_v7();
        let conv = Uuid::now_v7();

        for i in 0..10 {
            let mut msg = make_message(user, conv, Role::User, &format!("message {i}"));
            // Spread timestamps so ordering is unambiguous
            msg.created_at = Utc::now() + chrono::Duration::milliseconds(i * 10);
            repo.save_message(&msg).await.unwrap();
        }

        let messages = repo.recent_messages(&user, &conv, 4).await.unwrap();
        assert_eq!(messages.len(), 4);
        // The most recent 4, oldest first
        assert_eq!(messages[0].content, "message 6");
        assert_eq!(messages[3].content, "message 9");
    }

    #[tokio::test]
    async fn test_user_isolation() {
        let repo = SqliteConversationRepository::new(test_pool().await);
        let user_a = Uuid::now_v7();
        let user_b = Uuid::now_v7();
        let conv = Uuid::now_v7();

        repo.save_message(&make_message(user_a, conv, Role::User, "user A message"))
            .await
            .unwrap();
        repo.save_message(&make_message(user_b, conv, Role::User, "user B message"))
            .await
            .unwrap();

        // Same conversation id, different users: never cross-contaminated
        let a_messages = repo.recent_messages(&user_a, &conv, 10).await.unwrap();
        assert_eq!(a_messages.len(), 1);
        assert_eq!(a_messages[0].content, "user A message");

        let b_messages = repo.recent_messages(&user_b, &conv, 10).await.unwrap();
        assert_eq!(b_messages.len(), 1);
        assert_eq!(b_messages[0].content, "user B message");
    }

    #[tokio::test]
    async fn test_stats_single_pass_aggregate() {
        let repo = SqliteConversationRepository::new(test_pool().await);
        let user = Uuid::now_v7();
        let conv = Uuid::now_v7();

        repo.save_message(&make_message(user, conv, Role::User, "hello"))
            .await
            .unwrap();
        let mut reply = make_message(user, conv, Role::Assistant, "hi");
        reply.token_count = Some(100);
        reply.estimated_cost = Some(0.001);
        repo.save_message(&reply).await.unwrap();
        let mut reply2 = make_message(user, conv, Role::Assistant, "more");
        reply2.token_count = Some(50);
        reply2.estimated_cost = Some(0.0005);
        repo.save_message(&reply2).await.unwrap();

        let stats = repo.stats(&user, &conv).await.unwrap();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.assistant_messages, 2);
        assert_eq!(stats.total_tokens, 150);
        assert!((stats.estimated_cost - 0.0015).abs() < 1e-9);
        assert!(stats.first_message_at.is_some());
        assert!(stats.last_message_at >= stats.first_message_at);
    }

    #[tokio::test]
    async fn test_stats_empty_conversation() {
        let repo = SqliteConversationRepository::new(test_pool().await);
        let stats = repo.stats(&Uuid::now_v7(), &Uuid::now_v7()).await.unwrap();
        assert_eq!(stats.total_messages, 0);
        assert!(stats.first_message_at.is_none());
        assert!(stats.last_message_at.is_none());
    }

    #[tokio::test]
    async fn test_conversation_ids_most_recent_first() {
        let repo = SqliteConversationRepository::new(test_pool().await);
        let user = Uuid::now_v7();
        let conv_old = Uuid::now_v7();
        let conv_new = Uuid::now_v7();

        let mut old = make_message(user, conv_old, Role::User, "old");
        old.created_at = Utc::now() - chrono::Duration::hours(2);
        repo.save_message(&old).await.unwrap();
        repo.save_message(&make_message(user, conv_new, Role::User, "new"))
            .await
            .unwrap();

        let ids = repo.conversation_ids(&user).await.unwrap();
        assert_eq!(ids, vec![conv_new, conv_old]);
    }

    #[tokio::test]
    async fn test_prune_keeps_most_recent_and_is_idempotent() {
        let repo = SqliteConversationRepository::new(test_pool().await);
        let user = Uuid::now_v7();

        let mut convs = Vec::new();
        for i in 0..5 {
            let conv = Uuid::now_v7();
            let mut msg = make_message(user, conv, Role::User, &format!("conversation {i}"));
            msg.created_at = Utc::now() + chrono::Duration::seconds(i);
            repo.save_message(&msg).await.unwrap();
            convs.push(conv);
        }

        let removed = repo.prune_old_conversations(&user, 2).await.unwrap();
        assert_eq!(removed, 3);

        let remaining = repo.conversation_ids(&user).await.unwrap();
        assert_eq!(remaining.len(), 2);
        // The two most recently active survive
        assert_eq!(remaining, vec![convs[4], convs[3]]);

        // Second run: same final state, nothing more to delete
        let removed_again = repo.prune_old_conversations(&user, 2).await.unwrap();
        assert_eq!(removed_again, 0);
        assert_eq!(repo.conversation_ids(&user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_prune_does_not_touch_other_users() {
        let repo = SqliteConversationRepository::new(test_pool().await);
        let user_a = Uuid::now_v7();
        let user_b = Uuid::now_v7();

        for _ in 0..3 {
            repo.save_message(&make_message(user_a, Uuid::now_v7(), Role::User, "a"))
                .await
                .unwrap();
        }
        repo.save_message(&make_message(user_b, Uuid::now_v7(), Role::User, "b"))
            .await
            .unwrap();

        repo.prune_old_conversations(&user_a, 0).await.unwrap();

        assert!(repo.conversation_ids(&user_a).await.unwrap().is_empty());
        assert_eq!(repo.conversation_ids(&user_b).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_message_type() {
        let repo = SqliteConversationRepository::new(test_pool().await);
        let user = Uuid::now_v7();
        let conv = Uuid::now_v7();

        let msg = make_message(user, conv, Role::User, "log 2 eggs");
        repo.save_message(&msg).await.unwrap();

        repo.set_message_type(&user, &msg.id, MessageType::Command)
            .await
            .unwrap();
        let messages = repo.recent_messages(&user, &conv, 1).await.unwrap();
        assert_eq!(messages[0].message_type, MessageType::Command);

        // Another user cannot reclassify this message
        let err = repo
            .set_message_type(&Uuid::now_v7(), &msg.id, MessageType::Conversation)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }
}
