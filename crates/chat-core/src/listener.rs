//! Notification surface of the chat room.

use opencomm_session_core::Address;

use crate::message::ChatMessage;
use crate::room::ChatRoom;
use crate::types::{ChatMessageState, ChatRoomState};

/// Callbacks fired synchronously by the chat room, on the same execution
/// context as the triggering event. The room never holds its internal lock
/// across a callback, so implementations may call back into it.
pub trait ChatRoomListener: Send + Sync {
    fn on_state_changed(&self, _room: &ChatRoom, _state: ChatRoomState) {}

    fn on_message_sent(&self, _room: &ChatRoom, _message: &ChatMessage) {}

    fn on_message_received(&self, _room: &ChatRoom, _message: &ChatMessage) {}

    fn on_message_state_changed(&self, _room: &ChatRoom, _message: &ChatMessage, _state: ChatMessageState) {}

    fn on_is_composing_received(&self, _room: &ChatRoom, _from: &Address, _composing: bool) {}
}

/// Listener that ignores every notification.
#[derive(Debug, Default)]
pub struct NullChatRoomListener;

impl ChatRoomListener for NullChatRoomListener {}
