//! Readiness endpoint for the deployment's probe.
//!
//! Reports two independent checks: can the pool run a query at all, and
//! has the migration history been applied. A freshly provisioned database
//! answers the first and fails the second, which is exactly the state a
//! probe should refuse to route traffic to.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use crewdesk_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub ready: bool,
    pub detail: String,
}

impl ComponentHealth {
    fn ready(detail: impl Into<String>) -> Self {
        Self { ready: true, detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { ready: false, detail: detail.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub version: &'static str,
    pub database: ComponentHealth,
    pub schema: ComponentHealth,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthSnapshot>) {
    let database = database_check(&state.db_pool).await;
    // Schema state is only meaningful when the database answers at all.
    let schema = if database.ready {
        schema_check(&state.db_pool).await
    } else {
        ComponentHealth::degraded("unknown while the database is unreachable")
    };

    let ready = database.ready && schema.ready;
    let snapshot = HealthSnapshot {
        status: if ready { "ready" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        schema,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(snapshot))
}

async fn database_check(pool: &DbPool) -> ComponentHealth {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => ComponentHealth::ready("query succeeded"),
        Err(error) => ComponentHealth::degraded(format!("query failed: {error}")),
    }
}

async fn schema_check(pool: &DbPool) -> ComponentHealth {
    let applied =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations").fetch_one(pool).await;
    match applied {
        Ok(count) if count > 0 => ComponentHealth::ready(format!("{count} migrations applied")),
        Ok(_) => ComponentHealth::degraded("no migrations applied"),
        Err(_) => ComponentHealth::degraded("migration history unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use crewdesk_db::connect_with_settings;
    use crewdesk_db::migrations::run_pending;

    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn migrated_database_reports_ready() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5)
            .await
            .expect("pool should connect");
        run_pending(&pool).await.expect("run migrations");

        let (status, Json(snapshot)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot.status, "ready");
        assert!(snapshot.database.ready);
        assert!(snapshot.schema.ready);
        assert_eq!(snapshot.version, env!("CARGO_PKG_VERSION"));

        pool.close().await;
    }

    #[tokio::test]
    async fn unreachable_database_reports_service_unavailable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5)
            .await
            .expect("pool should connect");
        pool.close().await;

        let (status, Json(snapshot)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(snapshot.status, "degraded");
        assert!(!snapshot.database.ready);
        assert!(!snapshot.schema.ready);
    }

    #[tokio::test]
    async fn unmigrated_database_reports_schema_degraded() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5)
            .await
            .expect("pool should connect");

        let (status, Json(snapshot)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(snapshot.database.ready);
        assert!(!snapshot.schema.ready);

        pool.close().await;
    }
}
