//! Error types for the session layer.

use crate::types::{CallState, SessionId};

/// Main result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Main error type for session operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// A state transition that would corrupt call accounting. The mutator
    /// refuses it without touching the session; callers must not continue
    /// past this error.
    #[error("fatal state transition from {from} to {to}")]
    FatalStateTransition { from: CallState, to: CallState },

    /// The session is not in a state where the operation is permitted.
    #[error("operation {operation} not permitted in state {state}")]
    InvalidState { operation: &'static str, state: CallState },

    /// The call operation handle rejected or failed a request.
    #[error("operation layer failure: {0}")]
    OpFailed(String),

    /// No operation handle is attached to the session yet.
    #[error("no call operation configured")]
    NoOp,

    /// A session referenced through the registry no longer exists.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The owning core was torn down while the session was still reachable.
    #[error("core context destroyed")]
    CoreGone,
}

impl SessionError {
    pub fn op_failed(msg: impl Into<String>) -> Self {
        SessionError::OpFailed(msg.into())
    }

    /// True when retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::InvalidState { .. } | SessionError::OpFailed(_))
    }
}
