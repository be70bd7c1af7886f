//! The chat room: a small state machine coordinating message delivery and
//! composing indications.
//!
//! It follows the same notification pattern as the call session layer:
//! state is mutated under a short-lived lock, listeners are called
//! synchronously with the lock released, and time-based behavior is driven
//! exclusively by the external `iterate` tick.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use opencomm_session_core::{Address, Content};

use crate::composing::ComposingState;
use crate::config::ChatConfig;
use crate::errors::{ChatError, Result};
use crate::listener::ChatRoomListener;
use crate::message::ChatMessage;
use crate::transport::ChatMessageTransport;
use crate::types::{
    ChatMessageDirection, ChatMessageState, ChatRoomEvent, ChatRoomId, ChatRoomState, MessageId,
};

struct RoomInner {
    state: ChatRoomState,
    creation_time: i64,
    last_update_time: i64,
    composing: ComposingState,
    messages: Vec<ChatMessage>,
    events: Vec<ChatRoomEvent>,
    unread: usize,
}

pub struct ChatRoom {
    id: ChatRoomId,
    config: ChatConfig,
    transport: Arc<dyn ChatMessageTransport>,
    listener: Mutex<Arc<dyn ChatRoomListener>>,
    inner: Mutex<RoomInner>,
}

impl ChatRoom {
    pub fn new(
        id: ChatRoomId,
        config: ChatConfig,
        transport: Arc<dyn ChatMessageTransport>,
        listener: Arc<dyn ChatRoomListener>,
        now: i64,
    ) -> Self {
        info!("New ChatRoom [{}] instantiated", id);
        Self {
            id,
            config,
            transport,
            listener: Mutex::new(listener),
            inner: Mutex::new(RoomInner {
                state: ChatRoomState::Instantiated,
                creation_time: now,
                last_update_time: now,
                composing: ComposingState::default(),
                messages: Vec::new(),
                events: Vec::new(),
                unread: 0,
            }),
        }
    }

    pub fn id(&self) -> &ChatRoomId {
        &self.id
    }

    pub fn peer_address(&self) -> &Address {
        self.id.peer_address()
    }

    pub fn local_address(&self) -> &Address {
        self.id.local_address()
    }

    pub fn state(&self) -> ChatRoomState {
        self.inner.lock().state
    }

    pub fn creation_time(&self) -> i64 {
        self.inner.lock().creation_time
    }

    pub fn last_update_time(&self) -> i64 {
        self.inner.lock().last_update_time
    }

    pub fn set_listener(&self, listener: Arc<dyn ChatRoomListener>) {
        *self.listener.lock() = listener;
    }

    /// Move the room to a new lifecycle state and notify once. Setting the
    /// current state again is a no-op.
    pub fn set_state(&self, state: ChatRoomState) {
        let changed = {
            let mut inner = self.inner.lock();
            if inner.state == state {
                false
            } else {
                info!("ChatRoom [{}] moving from state {} to {}", self.id, inner.state, state);
                inner.state = state;
                inner.events.push(ChatRoomEvent::StateChanged(state));
                true
            }
        };
        if changed {
            self.listener().on_state_changed(self, state);
        }
    }

    /// Delete the room; terminal state.
    pub fn delete(&self) {
        self.set_state(ChatRoomState::Deleted);
    }

    // ==== Sending ====

    /// Send a message to the peer. Sending ends the local composing burst
    /// without an extra idle notification.
    pub fn send_message(&self, content: Content, now: i64) -> ChatMessage {
        let mut message = ChatMessage::new(
            ChatMessageDirection::Outgoing,
            self.id.local_address().clone(),
            content,
            now,
        );
        let result = self.transport.send_message(self.id.peer_address(), message.id(), message.content());
        let state = match result {
            Ok(()) => ChatMessageState::InProgress,
            Err(err) => {
                warn!("ChatRoom [{}] failed to send message: {}", self.id, err);
                // Idle to InProgress first, then the failure.
                message.set_state(ChatMessageState::InProgress);
                ChatMessageState::NotDelivered
            }
        };
        message.set_state(state);
        {
            let mut inner = self.inner.lock();
            inner.composing.stop_local();
            inner.last_update_time = now;
            let id = message.id().clone();
            inner.messages.push(message.clone());
            inner.events.push(ChatRoomEvent::MessageSent(id));
        }
        self.listener().on_message_sent(self, &message);
        message
    }

    /// Record local typing activity; advertises composing to the peer when
    /// a new burst starts.
    pub fn compose(&self, now: i64) {
        let started = {
            let mut inner = self.inner.lock();
            inner.composing.touch_local(&self.config, now)
        };
        if started && self.config.send_is_composing {
            if let Err(err) = self.transport.send_is_composing(self.id.peer_address(), true) {
                debug!("ChatRoom [{}] could not advertise composing: {}", self.id, err);
            }
        }
    }

    pub fn is_composing(&self) -> bool {
        self.inner.lock().composing.active
    }

    // ==== Receiving ====

    /// A message arrived from the peer. Returns the recorded message.
    ///
    /// Receiving a real message also clears the sender's composing
    /// indication and acknowledges delivery when configured to.
    pub fn receive_message(&self, from: Address, content: Content, now: i64) -> ChatMessage {
        let mut message =
            ChatMessage::new(ChatMessageDirection::Incoming, from.clone(), content, now);
        message.set_state(ChatMessageState::InProgress);
        message.set_state(ChatMessageState::Delivered);
        let was_composing = {
            let mut inner = self.inner.lock();
            inner.last_update_time = now;
            inner.unread += 1;
            let was_composing = inner.composing.is_remote_composing();
            inner.composing.set_remote(&self.config, &from, false, now);
            let id = message.id().clone();
            inner.messages.push(message.clone());
            inner.events.push(ChatRoomEvent::MessageReceived(id));
            was_composing
        };
        if was_composing {
            self.listener().on_is_composing_received(self, &from, false);
        }
        self.listener().on_message_received(self, &message);
        if self.config.send_delivery_receipts {
            if let Err(err) = self.transport.send_delivery_receipt(
                self.id.peer_address(),
                message.id(),
                ChatMessageState::Delivered,
            ) {
                debug!("ChatRoom [{}] could not send delivery receipt: {}", self.id, err);
            }
        }
        message
    }

    /// The peer advertised whether it is composing.
    pub fn receive_is_composing(&self, from: Address, composing: bool, now: i64) {
        {
            let mut inner = self.inner.lock();
            inner.composing.set_remote(&self.config, &from, composing, now);
        }
        self.listener().on_is_composing_received(self, &from, composing);
    }

    /// The peer acknowledged one of our messages.
    pub fn receive_delivery_notification(
        &self,
        message_id: &MessageId,
        state: ChatMessageState,
    ) -> Result<()> {
        let updated = {
            let mut inner = self.inner.lock();
            let Some(message) = inner.messages.iter_mut().find(|m| m.id() == message_id) else {
                warn!("ChatRoom [{}] got a receipt for unknown message {}", self.id, message_id);
                return Err(ChatError::MessageNotFound(message_id.clone()));
            };
            let from = message.state();
            if !message.set_state(state) {
                debug!(
                    "ChatRoom [{}] ignoring delivery regression {} -> {} for {}",
                    self.id, from, state, message_id
                );
                return Err(ChatError::InvalidDeliveryTransition { from, to: state });
            }
            message.clone()
        };
        self.listener().on_message_state_changed(self, &updated, state);
        Ok(())
    }

    // ==== Reading ====

    pub fn unread_message_count(&self) -> usize {
        self.inner.lock().unread
    }

    /// Mark every received message as read, acknowledging them as
    /// displayed.
    pub fn mark_as_read(&self) {
        let to_ack: Vec<MessageId> = {
            let mut inner = self.inner.lock();
            if inner.unread == 0 {
                return;
            }
            inner.unread = 0;
            inner
                .messages
                .iter()
                .filter(|m| m.direction() == ChatMessageDirection::Incoming)
                .map(|m| m.id().clone())
                .collect()
        };
        if !self.config.send_delivery_receipts {
            return;
        }
        for id in to_ack {
            if let Err(err) = self.transport.send_delivery_receipt(
                self.id.peer_address(),
                &id,
                ChatMessageState::Displayed,
            ) {
                debug!("ChatRoom [{}] could not send display receipt: {}", self.id, err);
            }
        }
    }

    // ==== Composing state ====

    pub fn is_remote_composing(&self) -> bool {
        self.inner.lock().composing.is_remote_composing()
    }

    pub fn composing_addresses(&self) -> Vec<Address> {
        self.inner.lock().composing.remote_addresses()
    }

    // ==== History ====

    pub fn history(&self) -> Vec<ChatRoomEvent> {
        self.inner.lock().events.clone()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn find_message(&self, id: &MessageId) -> Option<ChatMessage> {
        self.inner.lock().messages.iter().find(|m| m.id() == id).cloned()
    }

    // ==== Periodic tick ====

    /// Check composing deadlines. `now` is wall-clock Unix seconds.
    pub fn iterate(&self, now: i64) {
        let expiry = {
            let mut inner = self.inner.lock();
            inner.composing.check(&self.config, now)
        };
        if self.config.send_is_composing {
            if expiry.idle {
                let _ = self.transport.send_is_composing(self.id.peer_address(), false);
            } else if expiry.refresh {
                let _ = self.transport.send_is_composing(self.id.peer_address(), true);
            }
        }
        for address in expiry.expired_remotes {
            self.listener().on_is_composing_received(self, &address, false);
        }
    }

    fn listener(&self) -> Arc<dyn ChatRoomListener> {
        self.listener.lock().clone()
    }
}
