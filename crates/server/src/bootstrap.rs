use std::sync::Arc;
use std::time::Duration;

use novaxa_chat::runner::LaneSettings;
use novaxa_chat::{
    build_dispatcher, ChatTransport, NoopChatTransport, PollingRunner, ReconnectPolicy,
    TelegramTransport, TransportError,
};
use novaxa_core::config::{AppConfig, ChatTransportKind, ConfigError, LoadOptions};
use novaxa_core::errors::{ApplicationError, DomainError};
use novaxa_core::smart_reply::{EngineSettings, SmartReplyEngine};
use novaxa_db::{connect_with_config, migrations, DbPool, SqlCustomerDirectory, SqlReplyStore};
use thiserror::Error;
use tracing::{info, warn};

const LANE_CAPACITY: usize = 64;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<SmartReplyEngine>,
    pub chat_runner: PollingRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("smart reply settings are invalid: {0}")]
    Settings(#[source] DomainError),
    #[error("smart reply engine failed to load: {0}")]
    Engine(#[source] ApplicationError),
    #[error("chat transport could not be created: {0}")]
    Transport(#[source] TransportError),
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

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let settings =
        EngineSettings::from_config(&config.smart_reply).map_err(BootstrapError::Settings)?;
    let engine = SmartReplyEngine::load(
        Arc::new(SqlReplyStore::new(db_pool.clone())),
        Arc::new(SqlCustomerDirectory::new(db_pool.clone())),
        settings,
    )
    .await
    .map_err(BootstrapError::Engine)?;

    let issues = engine.report_startup_issues();
    if !issues.is_empty() {
        warn!(
            event_name = "system.bootstrap.configuration_issues",
            correlation_id = "bootstrap",
            issues = issues.len(),
            "smart reply configuration has issues; run `novaxa check` for details"
        );
    }
    let engine = Arc::new(engine);

    let transport: Arc<dyn ChatTransport> = match config.chat.transport {
        ChatTransportKind::Telegram => {
            Arc::new(TelegramTransport::new(&config.chat).map_err(BootstrapError::Transport)?)
        }
        ChatTransportKind::Noop => Arc::new(NoopChatTransport),
    };
    info!(
        event_name = "system.bootstrap.transport_selected",
        correlation_id = "bootstrap",
        transport_mode = config.chat.transport.as_str(),
        admins = config.chat.admin_user_ids.len(),
        "chat transport selected"
    );

    let chat_runner = PollingRunner::new(
        transport,
        build_dispatcher(engine.clone(), config.chat.admin_user_ids.iter().copied()),
        ReconnectPolicy::default(),
        LaneSettings {
            lanes: config.chat.worker_lanes,
            capacity: LANE_CAPACITY,
            drain_grace: Duration::from_secs(config.server.graceful_shutdown_secs),
        },
    );

    Ok(Application { config, db_pool, engine, chat_runner })
}
