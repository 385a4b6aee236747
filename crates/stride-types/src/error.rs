use thiserror::Error;

/// Errors from repository operations (used by trait definitions in stride-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Whether a retry with backoff is worth attempting.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Connection)
    }
}

/// Top-level orchestration failures surfaced to the caller.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("all {attempts} providers failed; last error: {last_error}")]
    ProviderExhausted { attempts: usize, last_error: String },

    #[error("request cancelled")]
    Cancelled,
}

impl OrchestratorError {
    /// Bounded-length, honest degraded-mode message for the user.
    ///
    /// Shown instead of a silent empty result when every provider failed.
    pub fn degraded_message(&self) -> String {
        match self {
            OrchestratorError::ProviderExhausted { .. } => {
                "I'm having trouble reaching my coaching brain right now. \
                 Your message was saved; please try again in a moment."
                    .to_string()
            }
            OrchestratorError::Cancelled => "Request cancelled.".to_string(),
        }
    }
}
