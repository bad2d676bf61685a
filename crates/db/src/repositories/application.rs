use sqlx::{sqlite::SqliteRow, Row};

use crewdesk_core::chrono::{DateTime, Utc};
use crewdesk_core::domain::application::{
    ActorId, Application, ApplicationId, ApplicationSource, ApplicationStatus, MessageRef,
    NewApplication,
};
use crewdesk_core::errors::TransitionError;

use super::{ApplicationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApplicationRepository {
    pool: DbPool,
}

impl SqlApplicationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Re-reads a row after a guarded update matched nothing and turns its
    /// current state into the error the caller should see.
    async fn conflict_for(
        &self,
        id: ApplicationId,
        check: impl FnOnce(&Application) -> Result<(), TransitionError>,
    ) -> RepositoryError {
        match self.fetch(id).await {
            Ok(Some(application)) => match check(&application) {
                Err(error) => error.into(),
                // The row moved again between the update and this read. The
                // caller still lost the race.
                Ok(()) => TransitionError::NotPending.into(),
            },
            Ok(None) => RepositoryError::NotFound(id),
            Err(error) => error,
        }
    }

    async fn fetch(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError> {
        let query = format!("{SELECT_COLUMNS} WHERE id = ?");
        let row = sqlx::query(&query).bind(id.0).fetch_optional(&self.pool).await?;
        row.map(application_from_row).transpose()
    }
}

const SELECT_COLUMNS: &str = "SELECT
    id,
    submitter_id,
    submitter_name,
    address,
    phone,
    task,
    comment,
    photo_ref,
    source,
    status,
    claimant_id,
    claimant_name,
    return_reason,
    returned_by_id,
    returned_by_name,
    close_reason,
    closed_by_id,
    closed_by_name,
    closed_at,
    broadcast_ref,
    created_at
 FROM applications";

#[async_trait::async_trait]
impl ApplicationRepository for SqlApplicationRepository {
    async fn create(
        &self,
        new: NewApplication,
        now: DateTime<Utc>,
    ) -> Result<Application, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO applications (
                submitter_id,
                submitter_name,
                address,
                phone,
                task,
                comment,
                photo_ref,
                source,
                status,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(new.submitter_id.0)
        .bind(&new.submitter_name)
        .bind(&new.address)
        .bind(&new.phone)
        .bind(&new.task)
        .bind(new.comment.as_deref())
        .bind(new.photo_ref.as_deref())
        .bind(new.source.as_str())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Application {
            id: ApplicationId(result.last_insert_rowid()),
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
        })
    }

    async fn get(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError> {
        self.fetch(id).await
    }

    async fn accept(
        &self,
        id: ApplicationId,
        claimant: ActorId,
        claimant_name: &str,
    ) -> Result<Application, RepositoryError> {
        let result = sqlx::query(
            "UPDATE applications
             SET status = 'accepted',
                 claimant_id = ?,
                 claimant_name = ?,
                 return_reason = NULL,
                 returned_by_id = NULL,
                 returned_by_name = NULL,
                 close_reason = NULL,
                 closed_by_id = NULL,
                 closed_by_name = NULL,
                 closed_at = NULL
             WHERE id = ? AND status = 'pending'",
        )
        .bind(claimant.0)
        .bind(claimant_name)
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.conflict_for(id, |application| application.can_accept()).await);
        }

        self.fetch(id).await?.ok_or(RepositoryError::NotFound(id))
    }

    async fn release(
        &self,
        id: ApplicationId,
        actor: ActorId,
        actor_name: &str,
        reason: Option<&str>,
    ) -> Result<Application, RepositoryError> {
        let result = sqlx::query(
            "UPDATE applications
             SET status = 'pending',
                 claimant_id = NULL,
                 claimant_name = NULL,
                 return_reason = ?,
                 returned_by_id = ?,
                 returned_by_name = ?,
                 close_reason = NULL,
                 closed_by_id = NULL,
                 closed_by_name = NULL,
                 closed_at = NULL
             WHERE id = ? AND status = 'accepted' AND claimant_id = ?",
        )
        .bind(reason)
        .bind(actor.0)
        .bind(actor_name)
        .bind(id.0)
        .bind(actor.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.conflict_for(id, |application| application.can_release(actor)).await);
        }

        self.fetch(id).await?.ok_or(RepositoryError::NotFound(id))
    }

    async fn close(
        &self,
        id: ApplicationId,
        actor: ActorId,
        actor_name: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Application, RepositoryError> {
        let result = sqlx::query(
            "UPDATE applications
             SET status = 'closed',
                 close_reason = ?,
                 closed_by_id = ?,
                 closed_by_name = ?,
                 closed_at = ?
             WHERE id = ? AND status = 'accepted' AND claimant_id = ?",
        )
        .bind(reason)
        .bind(actor.0)
        .bind(actor_name)
        .bind(now.to_rfc3339())
        .bind(id.0)
        .bind(actor.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.conflict_for(id, |application| application.can_close(actor)).await);
        }

        self.fetch(id).await?.ok_or(RepositoryError::NotFound(id))
    }

    async fn is_claimant(
        &self,
        id: ApplicationId,
        actor: ActorId,
    ) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count
             FROM applications
             WHERE id = ? AND status = 'accepted' AND claimant_id = ?",
        )
        .bind(id.0)
        .bind(actor.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("count")? > 0)
    }

    async fn list_pending(&self) -> Result<Vec<Application>, RepositoryError> {
        let query = format!("{SELECT_COLUMNS} WHERE status = 'pending' ORDER BY created_at ASC, id ASC");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.into_iter().map(application_from_row).collect()
    }

    async fn set_broadcast_ref(
        &self,
        id: ApplicationId,
        message_ref: &MessageRef,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE applications SET broadcast_ref = ? WHERE id = ?")
            .bind(&message_ref.0)
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }
}

fn application_from_row(row: SqliteRow) -> Result<Application, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ApplicationStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown application status `{status_raw}`"))
    })?;

    let source_raw = row.try_get::<String, _>("source")?;
    let source = ApplicationSource::parse(&source_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown application source `{source_raw}`"))
    })?;

    Ok(Application {
        id: ApplicationId(row.try_get("id")?),
        submitter_id: ActorId(row.try_get("submitter_id")?),
        submitter_name: row.try_get("submitter_name")?,
        address: row.try_get("address")?,
        phone: row.try_get("phone")?,
        task: row.try_get("task")?,
        comment: row.try_get("comment")?,
        photo_ref: row.try_get("photo_ref")?,
        source,
        status,
        claimant_id: row.try_get::<Option<i64>, _>("claimant_id")?.map(ActorId),
        claimant_name: row.try_get("claimant_name")?,
        return_reason: row.try_get("return_reason")?,
        returned_by_id: row.try_get::<Option<i64>, _>("returned_by_id")?.map(ActorId),
        returned_by_name: row.try_get("returned_by_name")?,
        close_reason: row.try_get("close_reason")?,
        closed_by_id: row.try_get::<Option<i64>, _>("closed_by_id")?.map(ActorId),
        closed_by_name: row.try_get("closed_by_name")?,
        closed_at: parse_optional_timestamp("closed_at", row.try_get("closed_at")?)?,
        broadcast_ref: row.try_get::<Option<String>, _>("broadcast_ref")?.map(MessageRef),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|value| parse_timestamp(column, value)).transpose()
}
