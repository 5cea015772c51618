use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::smart_reply::pattern::DEFAULT_REGEX_SIZE_LIMIT;
use crate::smart_reply::personalizer::PlaceholderField;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub chat: ChatConfig,
    pub smart_reply: SmartReplyConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub transport: ChatTransportKind,
    pub bot_token: SecretString,
    pub api_base_url: String,
    pub admin_user_ids: Vec<i64>,
    pub worker_lanes: usize,
    pub poll_timeout_secs: u64,
}

impl ChatConfig {
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmartReplyConfig {
    pub lookup_timeout_ms: u64,
    pub regex_size_limit: usize,
    /// Literal rendered for a placeholder when the customer or field is
    /// missing, keyed by field name.
    pub fallbacks: BTreeMap<String, String>,
}

impl Default for SmartReplyConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 500,
            regex_size_limit: DEFAULT_REGEX_SIZE_LIMIT,
            fallbacks: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatTransportKind {
    Telegram,
    Noop,
}

impl ChatTransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Noop => "noop",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub chat_transport: Option<ChatTransportKind>,
    pub chat_bot_token: Option<String>,
    pub chat_admin_user_ids: Option<Vec<i64>>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://novaxa.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            chat: ChatConfig {
                transport: ChatTransportKind::Noop,
                bot_token: String::new().into(),
                api_base_url: "https://api.telegram.org".to_string(),
                admin_user_ids: Vec::new(),
                worker_lanes: 8,
                poll_timeout_secs: 30,
            },
            smart_reply: SmartReplyConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for ChatTransportKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "telegram" => Ok(Self::Telegram),
            "noop" | "none" => Ok(Self::Noop),
            other => Err(ConfigError::Validation(format!(
                "unsupported chat transport `{other}` (expected telegram|noop)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("novaxa.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(chat) = patch.chat {
            if let Some(transport) = chat.transport {
                self.chat.transport = transport;
            }
            if let Some(bot_token) = chat.bot_token {
                self.chat.bot_token = secret_value(bot_token);
            }
            if let Some(api_base_url) = chat.api_base_url {
                self.chat.api_base_url = api_base_url;
            }
            if let Some(admin_user_ids) = chat.admin_user_ids {
                self.chat.admin_user_ids = admin_user_ids;
            }
            if let Some(worker_lanes) = chat.worker_lanes {
                self.chat.worker_lanes = worker_lanes;
            }
            if let Some(poll_timeout_secs) = chat.poll_timeout_secs {
                self.chat.poll_timeout_secs = poll_timeout_secs;
            }
        }

        if let Some(smart_reply) = patch.smart_reply {
            if let Some(lookup_timeout_ms) = smart_reply.lookup_timeout_ms {
                self.smart_reply.lookup_timeout_ms = lookup_timeout_ms;
            }
            if let Some(regex_size_limit) = smart_reply.regex_size_limit {
                self.smart_reply.regex_size_limit = regex_size_limit;
            }
            if let Some(fallbacks) = smart_reply.fallbacks {
                self.smart_reply.fallbacks.extend(fallbacks);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("NOVAXA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("NOVAXA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("NOVAXA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("NOVAXA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("NOVAXA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("NOVAXA_CHAT_TRANSPORT") {
            self.chat.transport = value.parse()?;
        }
        let bot_token = read_env("NOVAXA_CHAT_BOT_TOKEN").or_else(|| read_env("BOT_TOKEN"));
        if let Some(value) = bot_token {
            self.chat.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("NOVAXA_CHAT_API_BASE_URL") {
            self.chat.api_base_url = value;
        }
        if let Some(value) = read_env("NOVAXA_CHAT_ADMIN_USER_IDS") {
            self.chat.admin_user_ids = parse_id_list("NOVAXA_CHAT_ADMIN_USER_IDS", &value)?;
        }
        if let Some(value) = read_env("NOVAXA_CHAT_WORKER_LANES") {
            self.chat.worker_lanes = parse_usize("NOVAXA_CHAT_WORKER_LANES", &value)?;
        }
        if let Some(value) = read_env("NOVAXA_CHAT_POLL_TIMEOUT_SECS") {
            self.chat.poll_timeout_secs = parse_u64("NOVAXA_CHAT_POLL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("NOVAXA_SMART_REPLY_LOOKUP_TIMEOUT_MS") {
            self.smart_reply.lookup_timeout_ms =
                parse_u64("NOVAXA_SMART_REPLY_LOOKUP_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("NOVAXA_SMART_REPLY_REGEX_SIZE_LIMIT") {
            self.smart_reply.regex_size_limit =
                parse_usize("NOVAXA_SMART_REPLY_REGEX_SIZE_LIMIT", &value)?;
        }

        if let Some(value) = read_env("NOVAXA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("NOVAXA_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("NOVAXA_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("NOVAXA_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("NOVAXA_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("NOVAXA_LOGGING_LEVEL").or_else(|| read_env("NOVAXA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("NOVAXA_LOGGING_FORMAT").or_else(|| read_env("NOVAXA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(transport) = overrides.chat_transport {
            self.chat.transport = transport;
        }
        if let Some(bot_token) = overrides.chat_bot_token {
            self.chat.bot_token = secret_value(bot_token);
        }
        if let Some(admin_user_ids) = overrides.chat_admin_user_ids {
            self.chat.admin_user_ids = admin_user_ids;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_chat(&self.chat)?;
        validate_smart_reply(&self.smart_reply)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("novaxa.toml"), PathBuf::from("config/novaxa.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

/// Telegram bot tokens look like `<numeric bot id>:<secret>`.
pub fn looks_like_bot_token(token: &str) -> bool {
    let Some((bot_id, secret)) = token.split_once(':') else {
        return false;
    };
    !bot_id.is_empty()
        && bot_id.chars().all(|ch| ch.is_ascii_digit())
        && secret.len() >= 20
        && secret.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

fn validate_chat(chat: &ChatConfig) -> Result<(), ConfigError> {
    if chat.worker_lanes == 0 || chat.worker_lanes > 256 {
        return Err(ConfigError::Validation(
            "chat.worker_lanes must be in range 1..=256".to_string(),
        ));
    }

    if chat.poll_timeout_secs == 0 || chat.poll_timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "chat.poll_timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    if !chat.api_base_url.starts_with("http://") && !chat.api_base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "chat.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if chat.transport == ChatTransportKind::Telegram {
        let bot_token = chat.bot_token.expose_secret();
        if bot_token.trim().is_empty() {
            return Err(ConfigError::Validation(
                "chat.bot_token is required for the telegram transport. Get it from @BotFather"
                    .to_string(),
            ));
        }
        if !looks_like_bot_token(bot_token.trim()) {
            return Err(ConfigError::Validation(
                "chat.bot_token must look like `<bot id>:<secret>` as issued by @BotFather"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_smart_reply(smart_reply: &SmartReplyConfig) -> Result<(), ConfigError> {
    if smart_reply.lookup_timeout_ms == 0 || smart_reply.lookup_timeout_ms > 10_000 {
        return Err(ConfigError::Validation(
            "smart_reply.lookup_timeout_ms must be in range 1..=10000".to_string(),
        ));
    }

    if smart_reply.regex_size_limit < 1024 {
        return Err(ConfigError::Validation(
            "smart_reply.regex_size_limit must be at least 1024 bytes".to_string(),
        ));
    }

    if let Some(unknown) =
        smart_reply.fallbacks.keys().find(|key| PlaceholderField::parse(key).is_none())
    {
        return Err(ConfigError::Validation(format!(
            "smart_reply.fallbacks has unknown field `{unknown}` (expected one of name|first_name|email|status|notes|projects|user_id)"
        )));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_id_list(key: &str, value: &str) -> Result<Vec<i64>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| item.parse::<i64>().map_err(|_| invalid_override(key, value)))
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    chat: Option<ChatPatch>,
    smart_reply: Option<SmartReplyPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    transport: Option<ChatTransportKind>,
    bot_token: Option<String>,
    api_base_url: Option<String>,
    admin_user_ids: Option<Vec<i64>>,
    worker_lanes: Option<usize>,
    poll_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SmartReplyPatch {
    lookup_timeout_ms: Option<u64>,
    regex_size_limit: Option<usize>,
    fallbacks: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
