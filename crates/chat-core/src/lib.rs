//! Chat room coordination for the opencomm stack.
//!
//! A [`room::ChatRoom`] is a small state machine layered on top of message
//! send/receive: it tracks the room lifecycle, coordinates is-composing
//! indications (driven by the external `iterate` tick, never by internal
//! timers) and the per-message delivery states, and notifies the
//! application through [`listener::ChatRoomListener`] with the same
//! synchronous, re-entrancy tolerant contract as the call session layer.

mod composing;
pub mod config;
pub mod errors;
pub mod listener;
pub mod message;
pub mod room;
pub mod transport;
pub mod types;

pub use config::ChatConfig;
pub use errors::{ChatError, Result};
pub use listener::{ChatRoomListener, NullChatRoomListener};
pub use message::ChatMessage;
pub use room::ChatRoom;
pub use transport::ChatMessageTransport;
pub use types::{
    ChatMessageDirection, ChatMessageState, ChatRoomEvent, ChatRoomId, ChatRoomState, MessageId,
};
