//! Core types of the chat layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use opencomm_session_core::Address;

/// Identity of a chat room: the local and peer endpoints it binds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatRoomId {
    local: Address,
    peer: Address,
}

impl ChatRoomId {
    pub fn new(local: Address, peer: Address) -> Self {
        Self { local, peer }
    }

    pub fn local_address(&self) -> &Address {
        &self.local
    }

    pub fn peer_address(&self) -> &Address {
        &self.peer
    }
}

impl fmt::Display for ChatRoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.local, self.peer)
    }
}

/// Lifecycle state of a chat room.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChatRoomState {
    Instantiated,
    CreationPending,
    Created,
    CreationFailed,
    TerminationPending,
    Terminated,
    TerminationFailed,
    Deleted,
}

impl fmt::Display for ChatRoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Delivery state of a chat message.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChatMessageState {
    Idle,
    InProgress,
    Delivered,
    /// The recipient's client acknowledged the message.
    DeliveredToUser,
    /// The recipient displayed the message.
    Displayed,
    NotDelivered,
}

impl ChatMessageState {
    /// Delivery only progresses; a message never falls back from a
    /// stronger acknowledgement to a weaker one.
    pub fn can_transition_to(self, next: ChatMessageState) -> bool {
        use ChatMessageState::*;
        match (self, next) {
            (Idle, InProgress) => true,
            (InProgress, Delivered) | (InProgress, NotDelivered) => true,
            // A failed message may be resent.
            (NotDelivered, InProgress) => true,
            (Delivered, DeliveredToUser) | (Delivered, Displayed) => true,
            (DeliveredToUser, Displayed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ChatMessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Direction of a chat message.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChatMessageDirection {
    Incoming,
    Outgoing,
}

/// Message ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(format!("msg-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entry of the in-memory room history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChatRoomEvent {
    StateChanged(ChatRoomState),
    MessageSent(MessageId),
    MessageReceived(MessageId),
}
