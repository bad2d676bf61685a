use async_trait::async_trait;
use thiserror::Error;

use crewdesk_core::domain::application::{ActorId, MessageRef};

/// An inline button attached to a message. `data` round-trips through the
/// platform and comes back verbatim in an action event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionButton {
    pub label: String,
    pub data: String,
}

impl ActionButton {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self { label: label.into(), data: data.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub buttons: Vec<ActionButton>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), buttons: Vec::new() }
    }

    pub fn with_buttons(text: impl Into<String>, buttons: Vec<ActionButton>) -> Self {
        Self { text: text.into(), buttons }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The recipient has no open private channel with the bot. Callers fall
    /// back to a deep link in the shared channel.
    #[error("recipient is unreachable: {0}")]
    Unreachable(String),
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Outbound side of the chat platform. Implementations wrap a concrete bot
/// API; tests use recording fakes.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_private(
        &self,
        recipient: ActorId,
        message: OutgoingMessage,
    ) -> Result<MessageRef, SendError>;

    async fn send_to_channel(
        &self,
        channel_id: i64,
        message: OutgoingMessage,
    ) -> Result<MessageRef, SendError>;

    async fn edit_message(
        &self,
        message_ref: &MessageRef,
        message: OutgoingMessage,
    ) -> Result<(), SendError>;

    async fn delete_message(&self, message_ref: &MessageRef) -> Result<(), SendError>;
}

#[derive(Default)]
pub struct NoopMessenger;

#[async_trait]
impl Messenger for NoopMessenger {
    async fn send_private(
        &self,
        _recipient: ActorId,
        _message: OutgoingMessage,
    ) -> Result<MessageRef, SendError> {
        Ok(MessageRef("noop".to_string()))
    }

    async fn send_to_channel(
        &self,
        _channel_id: i64,
        _message: OutgoingMessage,
    ) -> Result<MessageRef, SendError> {
        Ok(MessageRef("noop".to_string()))
    }

    async fn edit_message(
        &self,
        _message_ref: &MessageRef,
        _message: OutgoingMessage,
    ) -> Result<(), SendError> {
        Ok(())
    }

    async fn delete_message(&self, _message_ref: &MessageRef) -> Result<(), SendError> {
        Ok(())
    }
}
