use std::collections::HashMap;

use tokio::sync::RwLock;

use crewdesk_core::chrono::{DateTime, Utc};
use crewdesk_core::domain::application::{
    ActorId, Application, ApplicationId, ApplicationStatus, MessageRef, NewApplication,
};

use super::{ApplicationRepository, RepositoryError};

#[derive(Default)]
struct Inner {
    next_id: i64,
    rows: HashMap<i64, Application>,
}

/// In-memory stand-in for the SQL repository, used by service and notifier
/// tests. Ids are monotonic and never reused, matching the SQL schema.
#[derive(Default)]
pub struct InMemoryApplicationRepository {
    inner: RwLock<Inner>,
}

impl InMemoryApplicationRepository {
    fn transition(
        inner: &mut Inner,
        id: ApplicationId,
        apply: impl FnOnce(&mut Application) -> Result<(), RepositoryError>,
    ) -> Result<Application, RepositoryError> {
        let application = inner.rows.get_mut(&id.0).ok_or(RepositoryError::NotFound(id))?;
        apply(application)?;
        Ok(application.clone())
    }

    // Accept and release both start a fresh claim chapter, so any close
    // metadata left on the row is scrubbed, matching the SQL repository.
    fn clear_close_metadata(application: &mut Application) {
        application.close_reason = None;
        application.closed_by_id = None;
        application.closed_by_name = None;
        application.closed_at = None;
    }
}

#[async_trait::async_trait]
impl ApplicationRepository for InMemoryApplicationRepository {
    async fn create(
        &self,
        new: NewApplication,
        now: DateTime<Utc>,
    ) -> Result<Application, RepositoryError> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = ApplicationId(inner.next_id);

        let application = Application {
            id,
            submitter_id: new.submitter_id,
            submitter_name: new.submitter_name,
            address: new.address,
            phone: new.phone,
            task: new.task,
            comment: new.comment,
            photo_ref: new.photo_ref,
            source: new.source,
            status: ApplicationStatus::Pending,
            claimant_id: None,
            claimant_name: None,
            return_reason: None,
            returned_by_id: None,
            returned_by_name: None,
            close_reason: None,
            closed_by_id: None,
            closed_by_name: None,
            closed_at: None,
            broadcast_ref: None,
            created_at: now,
        };
        inner.rows.insert(id.0, application.clone());
        Ok(application)
    }

    async fn get(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.rows.get(&id.0).cloned())
    }

    async fn accept(
        &self,
        id: ApplicationId,
        claimant: ActorId,
        claimant_name: &str,
    ) -> Result<Application, RepositoryError> {
        let mut inner = self.inner.write().await;
        Self::transition(&mut inner, id, |application| {
            application.can_accept()?;
            application.status = ApplicationStatus::Accepted;
            application.claimant_id = Some(claimant);
            application.claimant_name = Some(claimant_name.to_string());
            application.return_reason = None;
            application.returned_by_id = None;
            application.returned_by_name = None;
            Self::clear_close_metadata(application);
            Ok(())
        })
    }

    async fn release(
        &self,
        id: ApplicationId,
        actor: ActorId,
        actor_name: &str,
        reason: Option<&str>,
    ) -> Result<Application, RepositoryError> {
        let mut inner = self.inner.write().await;
        Self::transition(&mut inner, id, |application| {
            application.can_release(actor)?;
            application.status = ApplicationStatus::Pending;
            application.claimant_id = None;
            application.claimant_name = None;
            application.return_reason = reason.map(str::to_string);
            application.returned_by_id = Some(actor);
            application.returned_by_name = Some(actor_name.to_string());
            Self::clear_close_metadata(application);
            Ok(())
        })
    }

    async fn close(
        &self,
        id: ApplicationId,
        actor: ActorId,
        actor_name: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Application, RepositoryError> {
        let mut inner = self.inner.write().await;
        Self::transition(&mut inner, id, |application| {
            application.can_close(actor)?;
            application.status = ApplicationStatus::Closed;
            application.close_reason = reason.map(str::to_string);
            application.closed_by_id = Some(actor);
            application.closed_by_name = Some(actor_name.to_string());
            application.closed_at = Some(now);
            Ok(())
        })
    }

    async fn is_claimant(
        &self,
        id: ApplicationId,
        actor: ActorId,
    ) -> Result<bool, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.rows.get(&id.0).is_some_and(|application| application.is_claimant(actor)))
    }

    async fn list_pending(&self) -> Result<Vec<Application>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut pending: Vec<Application> = inner
            .rows
            .values()
            .filter(|application| application.status == ApplicationStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|application| (application.created_at, application.id));
        Ok(pending)
    }

    async fn set_broadcast_ref(
        &self,
        id: ApplicationId,
        message_ref: &MessageRef,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        let application = inner.rows.get_mut(&id.0).ok_or(RepositoryError::NotFound(id))?;
        application.broadcast_ref = Some(message_ref.clone());
        Ok(())
    }
}
