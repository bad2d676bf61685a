use async_trait::async_trait;
use thiserror::Error;

use crewdesk_core::chrono::{DateTime, Utc};
use crewdesk_core::domain::application::{
    ActorId, Application, ApplicationId, MessageRef, NewApplication,
};
use crewdesk_core::errors::TransitionError;

pub mod application;
pub mod memory;

pub use application::SqlApplicationRepository;
pub use memory::InMemoryApplicationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("application {0} does not exist")]
    NotFound(ApplicationId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Persistence contract for the application lifecycle. Every transition is a
/// single conditional statement: the status (and for release/close the
/// claimant) is part of the WHERE clause, so two racing actors can never both
/// succeed.
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn create(
        &self,
        new: NewApplication,
        now: DateTime<Utc>,
    ) -> Result<Application, RepositoryError>;

    async fn get(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError>;

    /// Claims a pending application for `claimant`. Exactly one of any number
    /// of concurrent callers wins; the rest see a `Transition` error.
    async fn accept(
        &self,
        id: ApplicationId,
        claimant: ActorId,
        claimant_name: &str,
    ) -> Result<Application, RepositoryError>;

    /// Puts an accepted application back into the pending pool. Only the
    /// current claimant may do this.
    async fn release(
        &self,
        id: ApplicationId,
        actor: ActorId,
        actor_name: &str,
        reason: Option<&str>,
    ) -> Result<Application, RepositoryError>;

    /// Terminal transition. Only the current claimant may close; a closed
    /// application refuses every further transition.
    async fn close(
        &self,
        id: ApplicationId,
        actor: ActorId,
        actor_name: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Application, RepositoryError>;

    async fn is_claimant(
        &self,
        id: ApplicationId,
        actor: ActorId,
    ) -> Result<bool, RepositoryError>;

    /// Pending applications, oldest first.
    async fn list_pending(&self) -> Result<Vec<Application>, RepositoryError>;

    async fn set_broadcast_ref(
        &self,
        id: ApplicationId,
        message_ref: &MessageRef,
    ) -> Result<(), RepositoryError>;
}
