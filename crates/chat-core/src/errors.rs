//! Error types for the chat layer.

use crate::types::{ChatMessageState, MessageId};

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    /// The message transport rejected or failed a send.
    #[error("transport failure: {0}")]
    TransportFailed(String),

    /// A delivery notification would move a message backwards.
    #[error("invalid delivery transition from {from} to {to}")]
    InvalidDeliveryTransition { from: ChatMessageState, to: ChatMessageState },

    #[error("message not found: {0}")]
    MessageNotFound(MessageId),
}

impl ChatError {
    pub fn transport(msg: impl Into<String>) -> Self {
        ChatError::TransportFailed(msg.into())
    }
}
