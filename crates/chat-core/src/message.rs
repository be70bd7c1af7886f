//! Chat message record with its delivery state.

use serde::{Deserialize, Serialize};

use opencomm_session_core::{Address, Content};

use crate::types::{ChatMessageDirection, ChatMessageState, MessageId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    id: MessageId,
    direction: ChatMessageDirection,
    from: Address,
    time: i64,
    content: Content,
    state: ChatMessageState,
}

impl ChatMessage {
    pub fn new(
        direction: ChatMessageDirection,
        from: Address,
        content: Content,
        time: i64,
    ) -> Self {
        Self {
            id: MessageId::new(),
            direction,
            from,
            time,
            content,
            state: ChatMessageState::Idle,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn direction(&self) -> ChatMessageDirection {
        self.direction
    }

    pub fn from_address(&self) -> &Address {
        &self.from
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn state(&self) -> ChatMessageState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ChatMessageState) -> bool {
        if self.state.can_transition_to(state) {
            self.state = state;
            true
        } else {
            false
        }
    }
}
