//! Message transport collaborator interface.
//!
//! The wire encoding of messages, composing indications and delivery
//! receipts belongs to the SIP engine; the chat room only decides when to
//! send what.

use opencomm_session_core::{Address, Content};

use crate::errors::Result;
use crate::types::{ChatMessageState, MessageId};

pub trait ChatMessageTransport: Send + Sync {
    fn send_message(&self, to: &Address, message: &MessageId, content: &Content) -> Result<()>;

    /// Advertise whether the local user is composing.
    fn send_is_composing(&self, to: &Address, composing: bool) -> Result<()>;

    /// Acknowledge a received message with the given delivery state.
    fn send_delivery_receipt(
        &self,
        to: &Address,
        message: &MessageId,
        state: ChatMessageState,
    ) -> Result<()>;
}
