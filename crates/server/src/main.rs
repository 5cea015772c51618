mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;
use novaxa_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config.logging);

    let bootstrap::Application { config, db_pool, engine, chat_runner } =
        bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &config.server.bind_address,
        config.server.health_check_port,
        health::HealthState::new(db_pool.clone(), engine),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(async move { chat_runner.run(shutdown_rx).await });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        transport_mode = config.chat.transport.as_str(),
        "novaxa-server started"
    );
    tokio::signal::ctrl_c().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        graceful_shutdown_secs = config.server.graceful_shutdown_secs,
        "novaxa-server stopping"
    );

    let _ = shutdown_tx.send(true);
    // Lanes get the full grace period; allow a little extra for the runner to return.
    let grace = Duration::from_secs(config.server.graceful_shutdown_secs + 1);
    match tokio::time::timeout(grace, runner).await {
        Ok(Ok(result)) => result?,
        Ok(Err(join_error)) => tracing::warn!(
            event_name = "system.server.runner_failed",
            error = %join_error,
            "chat runner task failed"
        ),
        Err(_) => tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            "chat runner did not stop within the grace period"
        ),
    }

    db_pool.close().await;
    tracing::info!(event_name = "system.server.stopped", correlation_id = "shutdown", "novaxa-server stopped");
    Ok(())
}
