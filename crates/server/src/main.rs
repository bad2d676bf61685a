mod bootstrap;
mod health;
mod webhook;

use std::time::Duration;

use anyhow::Result;
use crewdesk_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use crewdesk_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let mut router = health::router(app.db_pool.clone());
    if app.config.webhook.enabled {
        if let Some(secret) = app.config.webhook.shared_secret.clone() {
            router = router.merge(webhook::router(app.service.clone(), secret));
            tracing::info!(
                event_name = "system.server.webhook_enabled",
                correlation_id = "bootstrap",
                "webhook intake surface enabled"
            );
        }
    }

    let bind = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(
        event_name = "system.server.http_listening",
        correlation_id = "bootstrap",
        address = %bind,
        "http server listening"
    );
    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router).await {
            tracing::warn!(
                event_name = "system.server.http_stopped",
                error = %error,
                "http server stopped unexpectedly"
            );
        }
    });

    // Abandoned intake forms are swept on a fixed cadence so stalled
    // submitters get told their draft expired.
    let sweeper = app.service.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            sweeper.expire_idle_forms().await;
        }
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        "crewdesk-server started"
    );

    app.runner.start().await?;

    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "crewdesk-server stopping"
    );

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
