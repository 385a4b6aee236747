//! ConversationRepository trait definition.
//!
//! Durable message history with indexed, user-scoped retrieval.
//! Implementations live in stride-infra (e.g., `SqliteConversationRepository`).
//! Uses native async fn in traits (RPITIT, Rust 2024 edition).
//!
//! Every query is parameterized by at least `user_id`: returning another
//! user's messages is a correctness bug, not a performance one.

use uuid::Uuid;

use stride_types::error::RepositoryError;
use stride_types::message::{ConversationStats, Message, MessageType};

/// Repository trait for conversation message persistence.
pub trait ConversationRepository: Send + Sync {
    /// Persist a new message. The message is immutable afterward except
    /// for its `message_type` tag.
    fn save_message(
        &self,
        message: &Message,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// The most recent `limit` messages of a conversation, returned in
    /// chronological (ascending) order.
    ///
    /// Must be served by an indexed equality/range query on
    /// `(user_id, conversation_id, created_at)` -- never fetch-all-then-filter.
    fn recent_messages(
        &self,
        user_id: &Uuid,
        conversation_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, RepositoryError>> + Send;

    /// Aggregate statistics for one conversation, computed in a single
    /// indexed pass.
    fn stats(
        &self,
        user_id: &Uuid,
        conversation_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<ConversationStats, RepositoryError>> + Send;

    /// Distinct conversation ids for a user, ordered by most recent
    /// activity descending.
    fn conversation_ids(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Uuid>, RepositoryError>> + Send;

    /// Delete all messages of conversations beyond the `keep_last` most
    /// recently active ones. Transactional per conversation and
    /// idempotent. Returns the number of conversations removed.
    fn prune_old_conversations(
        &self,
        user_id: &Uuid,
        keep_last: u32,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Apply the late-bound message classification tag.
    fn set_message_type(
        &self,
        user_id: &Uuid,
        message_id: &Uuid,
        message_type: MessageType,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
