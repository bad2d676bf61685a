pub mod commands;
pub mod events;
pub mod messages;
pub mod messenger;
pub mod notifier;
pub mod runner;
pub mod service;

pub use messenger::{ActionButton, Messenger, NoopMessenger, OutgoingMessage, SendError};
pub use notifier::DispatchNotifier;
pub use runner::{ReconnectPolicy, TransportError, UpdateRunner, UpdateTransport};
pub use service::{IntakeService, ServiceError};
