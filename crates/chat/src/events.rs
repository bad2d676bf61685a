use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crewdesk_core::domain::application::{ActorId, MessageRef};

use crate::commands::CommandParseError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEnvelope {
    pub envelope_id: String,
    pub event: ChatEvent,
}

/// Typed inbound updates from the chat platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    TextReceived(TextReceivedEvent),
    ActionTriggered(ActionTriggeredEvent),
    AttachmentReceived(AttachmentReceivedEvent),
    Unsupported { event_type: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            Self::TextReceived(_) => ChatEventType::TextReceived,
            Self::ActionTriggered(_) => ChatEventType::ActionTriggered,
            Self::AttachmentReceived(_) => ChatEventType::AttachmentReceived,
            Self::Unsupported { .. } => ChatEventType::Unsupported,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    TextReceived,
    ActionTriggered,
    AttachmentReceived,
    Unsupported,
}

/// A private-chat text message from an actor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextReceivedEvent {
    pub actor: ActorId,
    pub actor_name: String,
    pub text: String,
}

/// A button press; `data` is the opaque callback payload the button carried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionTriggeredEvent {
    pub actor: ActorId,
    pub actor_name: String,
    pub message_ref: MessageRef,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentReceivedEvent {
    pub actor: ActorId,
    pub actor_name: String,
    pub attachment_ref: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error("intake service failure: {0}")]
    Service(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> ChatEventType;
    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChatEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// What the event handlers need from the application side. Implemented by
/// `IntakeService`; tests substitute fakes.
#[async_trait]
pub trait IntakeEventService: Send + Sync {
    async fn handle_text(
        &self,
        event: &TextReceivedEvent,
        ctx: &EventContext,
    ) -> Result<(), EventHandlerError>;

    async fn handle_action(
        &self,
        event: &ActionTriggeredEvent,
        ctx: &EventContext,
    ) -> Result<(), EventHandlerError>;

    async fn handle_attachment(
        &self,
        event: &AttachmentReceivedEvent,
        ctx: &EventContext,
    ) -> Result<(), EventHandlerError>;
}

#[derive(Default)]
pub struct NoopIntakeEventService;

#[async_trait]
impl IntakeEventService for NoopIntakeEventService {
    async fn handle_text(
        &self,
        _event: &TextReceivedEvent,
        _ctx: &EventContext,
    ) -> Result<(), EventHandlerError> {
        Ok(())
    }

    async fn handle_action(
        &self,
        _event: &ActionTriggeredEvent,
        _ctx: &EventContext,
    ) -> Result<(), EventHandlerError> {
        Ok(())
    }

    async fn handle_attachment(
        &self,
        _event: &AttachmentReceivedEvent,
        _ctx: &EventContext,
    ) -> Result<(), EventHandlerError> {
        Ok(())
    }
}

pub struct TextReceivedHandler<S> {
    service: Arc<S>,
}

impl<S> TextReceivedHandler<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for TextReceivedHandler<S>
where
    S: IntakeEventService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::TextReceived
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::TextReceived(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        self.service.handle_text(event, ctx).await?;
        Ok(HandlerResult::Processed)
    }
}

pub struct ActionTriggeredHandler<S> {
    service: Arc<S>,
}

impl<S> ActionTriggeredHandler<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for ActionTriggeredHandler<S>
where
    S: IntakeEventService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::ActionTriggered
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::ActionTriggered(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        self.service.handle_action(event, ctx).await?;
        Ok(HandlerResult::Processed)
    }
}

pub struct AttachmentReceivedHandler<S> {
    service: Arc<S>,
}

impl<S> AttachmentReceivedHandler<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for AttachmentReceivedHandler<S>
where
    S: IntakeEventService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::AttachmentReceived
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::AttachmentReceived(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        self.service.handle_attachment(event, ctx).await?;
        Ok(HandlerResult::Processed)
    }
}

/// Wires all three handlers of one service into a dispatcher.
pub fn dispatcher_for<S>(service: Arc<S>) -> EventDispatcher
where
    S: IntakeEventService + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(TextReceivedHandler::new(Arc::clone(&service)));
    dispatcher.register(ActionTriggeredHandler::new(Arc::clone(&service)));
    dispatcher.register(AttachmentReceivedHandler::new(service));
    dispatcher
}

pub fn default_dispatcher() -> EventDispatcher {
    dispatcher_for(Arc::new(NoopIntakeEventService))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use crewdesk_core::domain::application::ActorId;

    use super::{
        default_dispatcher, dispatcher_for, ChatEnvelope, ChatEvent, EventContext,
        EventHandlerError, HandlerResult, IntakeEventService, TextReceivedEvent,
    };

    #[derive(Default)]
    struct RecordingService {
        texts: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl IntakeEventService for RecordingService {
        async fn handle_text(
            &self,
            event: &TextReceivedEvent,
            _ctx: &EventContext,
        ) -> Result<(), EventHandlerError> {
            self.texts.lock().await.push(event.text.clone());
            Ok(())
        }

        async fn handle_action(
            &self,
            _event: &super::ActionTriggeredEvent,
            _ctx: &EventContext,
        ) -> Result<(), EventHandlerError> {
            Ok(())
        }

        async fn handle_attachment(
            &self,
            _event: &super::AttachmentReceivedEvent,
            _ctx: &EventContext,
        ) -> Result<(), EventHandlerError> {
            Ok(())
        }
    }

    fn text_envelope(text: &str) -> ChatEnvelope {
        ChatEnvelope {
            envelope_id: "env-1".to_string(),
            event: ChatEvent::TextReceived(TextReceivedEvent {
                actor: ActorId(7),
                actor_name: "Pat".to_string(),
                text: text.to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn dispatcher_routes_text_events_to_the_service() {
        let service = Arc::new(RecordingService::default());
        let dispatcher = dispatcher_for(Arc::clone(&service));

        let result = dispatcher
            .dispatch(&text_envelope("12 Elm St"), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Processed);
        assert_eq!(service.texts.lock().await.clone(), vec!["12 Elm St".to_string()]);
    }

    #[tokio::test]
    async fn unsupported_events_are_ignored() {
        let dispatcher = default_dispatcher();
        let envelope = ChatEnvelope {
            envelope_id: "env-2".to_string(),
            event: ChatEvent::Unsupported { event_type: "sticker".to_string() },
        };

        let result =
            dispatcher.dispatch(&envelope, &EventContext::default()).await.expect("dispatch");
        assert_eq!(result, HandlerResult::Ignored);
        assert_eq!(dispatcher.handler_count(), 3);
    }
}
