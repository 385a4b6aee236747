//! Request-scoped context shared across one user turn.
//!
//! Carries the identity of the turn and a cancellation token. The token
//! forms a tree: cancelling a parent cancels all children, but not vice
//! versa, so a follow-up generation can be abandoned without tearing
//! down the whole turn.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identity and cancellation scope for a single user turn.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub conversation_id: Uuid,
    pub cancellation: CancellationToken,
}

impl RequestContext {
    /// Create a fresh context with its own root cancellation token.
    pub fn new(user_id: Uuid, conversation_id: Uuid) -> Self {
        Self {
            user_id,
            conversation_id,
            cancellation: CancellationToken::new(),
        }
    }

    /// Derive a child context for a sub-operation.
    ///
    /// The child receives a child cancellation token: cancelled when the
    /// parent is cancelled, cancellable on its own without affecting the
    /// parent.
    pub fn child(&self) -> Self {
        Self {
            user_id: self.user_id,
            conversation_id: self.conversation_id,
            cancellation: self.cancellation.child_token(),
        }
    }

    /// Check whether this context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancel this context and all children.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}
