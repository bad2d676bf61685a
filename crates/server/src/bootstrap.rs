use std::sync::Arc;

use chrono::Duration;
use thiserror::Error;
use tracing::info;

use crewdesk_chat::events::dispatcher_for;
use crewdesk_chat::messenger::NoopMessenger;
use crewdesk_chat::runner::NoopUpdateTransport;
use crewdesk_chat::{DispatchNotifier, IntakeService, ReconnectPolicy, UpdateRunner};
use crewdesk_core::access::AccessTokenIssuer;
use crewdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use crewdesk_core::intake::FormEngine;
use crewdesk_db::repositories::SqlApplicationRepository;
use crewdesk_db::{connect_with_settings, migrations, DbPool};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<IntakeService>,
    pub runner: UpdateRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let repository = Arc::new(SqlApplicationRepository::new(db_pool.clone()));
    let tokens = Arc::new(AccessTokenIssuer::new(Duration::seconds(
        config.intake.token_ttl_secs as i64,
    )));
    // The concrete bot transport plugs in here; the default wiring keeps
    // the process healthy without one, same as running with the webhook
    // surface alone.
    let messenger = Arc::new(NoopMessenger);
    let notifier = DispatchNotifier::new(
        messenger.clone(),
        config.chat.channel_id,
        Arc::clone(&tokens),
        config.webhook.deep_link_base_url.clone(),
    );
    let service = Arc::new(IntakeService::new(
        FormEngine::new(Duration::seconds(config.intake.form_idle_timeout_secs as i64)),
        repository,
        notifier,
        messenger,
        tokens,
        config.intake.collect_attachment,
    ));

    let runner = UpdateRunner::new(
        Arc::new(NoopUpdateTransport),
        dispatcher_for(Arc::clone(&service)),
        ReconnectPolicy {
            max_retries: config.chat.reconnect_max_retries,
            ..ReconnectPolicy::default()
        },
    );

    Ok(Application { config, db_pool, service, runner })
}

#[cfg(test)]
mod tests {
    use crewdesk_core::config::{ConfigOverrides, LoadOptions};

    use super::bootstrap;

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                bot_token: Some("test-token".to_string()),
                channel_id: Some(-1001),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_required_chat_settings() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                bot_token: Some("test-token".to_string()),
                // channel id left unset
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("bootstrap should fail").to_string();
        assert!(message.contains("chat.channel_id"));
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_service() {
        let app = bootstrap(valid_overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'applications'",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("applications table should exist after bootstrap");
        assert_eq!(table_count, 1);

        app.db_pool.close().await;
    }
}
