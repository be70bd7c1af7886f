//! Chat room state, composing and delivery coordination.

use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use opencomm_chat_core::{
    ChatConfig, ChatError, ChatMessage, ChatMessageState, ChatMessageTransport, ChatRoom,
    ChatRoomEvent, ChatRoomId, ChatRoomListener, ChatRoomState, MessageId,
};
use opencomm_session_core::{Address, Content};

#[derive(Default)]
struct MockTransport {
    sent_messages: Mutex<Vec<(MessageId, Content)>>,
    composing_sent: Mutex<Vec<bool>>,
    receipts: Mutex<Vec<(MessageId, ChatMessageState)>>,
    fail_sends: Mutex<bool>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ChatMessageTransport for MockTransport {
    fn send_message(
        &self,
        _to: &Address,
        message: &MessageId,
        content: &Content,
    ) -> opencomm_chat_core::Result<()> {
        if *self.fail_sends.lock() {
            return Err(ChatError::transport("link down"));
        }
        self.sent_messages.lock().push((message.clone(), content.clone()));
        Ok(())
    }

    fn send_is_composing(&self, _to: &Address, composing: bool) -> opencomm_chat_core::Result<()> {
        self.composing_sent.lock().push(composing);
        Ok(())
    }

    fn send_delivery_receipt(
        &self,
        _to: &Address,
        message: &MessageId,
        state: ChatMessageState,
    ) -> opencomm_chat_core::Result<()> {
        self.receipts.lock().push((message.clone(), state));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingRoomListener {
    states: Mutex<Vec<ChatRoomState>>,
    received: Mutex<Vec<MessageId>>,
    message_states: Mutex<Vec<(MessageId, ChatMessageState)>>,
    composing: Mutex<Vec<(Address, bool)>>,
}

impl ChatRoomListener for RecordingRoomListener {
    fn on_state_changed(&self, _room: &ChatRoom, state: ChatRoomState) {
        self.states.lock().push(state);
    }

    fn on_message_received(&self, _room: &ChatRoom, message: &ChatMessage) {
        self.received.lock().push(message.id().clone());
    }

    fn on_message_state_changed(&self, _room: &ChatRoom, message: &ChatMessage, state: ChatMessageState) {
        self.message_states.lock().push((message.id().clone(), state));
    }

    fn on_is_composing_received(&self, _room: &ChatRoom, from: &Address, composing: bool) {
        self.composing.lock().push((from.clone(), composing));
    }
}

fn room_with(
    transport: Arc<MockTransport>,
    listener: Arc<RecordingRoomListener>,
) -> ChatRoom {
    ChatRoom::new(
        ChatRoomId::new(Address::new("sip:me@example.org"), Address::new("sip:peer@example.org")),
        ChatConfig::default(),
        transport,
        listener,
        1000,
    )
}

fn peer() -> Address {
    Address::new("sip:peer@example.org")
}

#[test]
fn state_change_notifies_exactly_once() {
    let transport = MockTransport::new();
    let listener = Arc::new(RecordingRoomListener::default());
    let room = room_with(transport, listener.clone());

    assert_eq!(room.state(), ChatRoomState::Instantiated);
    room.set_state(ChatRoomState::CreationPending);
    room.set_state(ChatRoomState::CreationPending);
    room.set_state(ChatRoomState::Created);

    assert_eq!(
        *listener.states.lock(),
        vec![ChatRoomState::CreationPending, ChatRoomState::Created]
    );
}

#[test]
fn sending_a_message_records_it_and_stops_composing() {
    let transport = MockTransport::new();
    let listener = Arc::new(RecordingRoomListener::default());
    let room = room_with(transport.clone(), listener);

    room.compose(1000);
    assert!(room.is_composing());
    assert_eq!(*transport.composing_sent.lock(), vec![true]);

    let message = room.send_message(Content::new("text/plain", "hello"), 1002);
    assert_eq!(message.state(), ChatMessageState::InProgress);
    assert_eq!(transport.sent_messages.lock().len(), 1);
    assert!(!room.is_composing());

    // With composing stopped, the idle deadline no longer fires.
    room.iterate(1030);
    assert_eq!(*transport.composing_sent.lock(), vec![true]);

    assert_eq!(room.history().last(), Some(&ChatRoomEvent::MessageSent(message.id().clone())));
}

#[test]
fn failed_send_is_marked_not_delivered() {
    let transport = MockTransport::new();
    *transport.fail_sends.lock() = true;
    let listener = Arc::new(RecordingRoomListener::default());
    let room = room_with(transport, listener);

    let message = room.send_message(Content::new("text/plain", "hello"), 1002);
    assert_eq!(message.state(), ChatMessageState::NotDelivered);
}

#[test]
fn composing_refresh_and_idle_are_tick_driven() {
    let transport = MockTransport::new();
    let listener = Arc::new(RecordingRoomListener::default());
    let room = room_with(transport.clone(), listener);

    room.compose(1000);
    // Keep typing so only the refresh deadline passes.
    room.compose(1050);
    room.iterate(1060);
    assert_eq!(*transport.composing_sent.lock(), vec![true, true]);

    // Nothing fires between deadlines.
    room.iterate(1061);
    assert_eq!(transport.composing_sent.lock().len(), 2);

    // Silence past the idle deadline sends the idle notification.
    room.iterate(1070);
    assert_eq!(*transport.composing_sent.lock(), vec![true, true, false]);
    assert!(!room.is_composing());
}

#[test]
fn receiving_a_message_acknowledges_and_clears_remote_composing() {
    let transport = MockTransport::new();
    let listener = Arc::new(RecordingRoomListener::default());
    let room = room_with(transport.clone(), listener.clone());

    room.receive_is_composing(peer(), true, 1000);
    assert!(room.is_remote_composing());
    assert_eq!(room.composing_addresses(), vec![peer()]);

    let message = room.receive_message(peer(), Content::new("text/plain", "hi there"), 1005);

    assert!(!room.is_remote_composing());
    assert_eq!(room.unread_message_count(), 1);
    assert_eq!(*listener.received.lock(), vec![message.id().clone()]);
    // Composing cleared before the message notification.
    assert_eq!(*listener.composing.lock(), vec![(peer(), true), (peer(), false)]);
    assert_eq!(*transport.receipts.lock(), vec![(message.id().clone(), ChatMessageState::Delivered)]);
}

#[test]
fn remote_composing_expires_without_refresh() {
    let transport = MockTransport::new();
    let listener = Arc::new(RecordingRoomListener::default());
    let room = room_with(transport, listener.clone());

    room.receive_is_composing(peer(), true, 1000);
    room.iterate(1100);
    assert!(room.is_remote_composing());

    room.iterate(1120);
    assert!(!room.is_remote_composing());
    assert_eq!(listener.composing.lock().last(), Some(&(peer(), false)));
}

#[test]
fn delivery_states_progress_and_never_regress() {
    let transport = MockTransport::new();
    let listener = Arc::new(RecordingRoomListener::default());
    let room = room_with(transport, listener.clone());

    let message = room.send_message(Content::new("text/plain", "hello"), 1002);
    room.receive_delivery_notification(message.id(), ChatMessageState::Delivered).unwrap();
    room.receive_delivery_notification(message.id(), ChatMessageState::Displayed).unwrap();

    assert_eq!(
        *listener.message_states.lock(),
        vec![
            (message.id().clone(), ChatMessageState::Delivered),
            (message.id().clone(), ChatMessageState::Displayed),
        ]
    );

    // A late weaker receipt is refused and not notified.
    let result = room.receive_delivery_notification(message.id(), ChatMessageState::Delivered);
    assert!(matches!(result, Err(ChatError::InvalidDeliveryTransition { .. })));
    assert_eq!(listener.message_states.lock().len(), 2);
    assert_eq!(room.find_message(message.id()).unwrap().state(), ChatMessageState::Displayed);
}

#[test]
fn unknown_receipt_is_an_error() {
    let transport = MockTransport::new();
    let listener = Arc::new(RecordingRoomListener::default());
    let room = room_with(transport, listener);
    let unknown = MessageId::new();
    let result = room.receive_delivery_notification(&unknown, ChatMessageState::Delivered);
    assert!(matches!(result, Err(ChatError::MessageNotFound(_))));
}

#[test]
fn mark_as_read_sends_display_receipts() {
    let transport = MockTransport::new();
    let listener = Arc::new(RecordingRoomListener::default());
    let room = room_with(transport.clone(), listener);

    let first = room.receive_message(peer(), Content::new("text/plain", "one"), 1001);
    let second = room.receive_message(peer(), Content::new("text/plain", "two"), 1002);
    assert_eq!(room.unread_message_count(), 2);
    transport.receipts.lock().clear();

    room.mark_as_read();
    assert_eq!(room.unread_message_count(), 0);
    assert_eq!(
        *transport.receipts.lock(),
        vec![
            (first.id().clone(), ChatMessageState::Displayed),
            (second.id().clone(), ChatMessageState::Displayed),
        ]
    );

    // Reading an already read room does nothing.
    transport.receipts.lock().clear();
    room.mark_as_read();
    assert!(transport.receipts.lock().is_empty());
}
