use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use novaxa_core::config::AppConfig;
use secrecy::ExposeSecret;
use serde_json::{json, Map, Value as JsonValue};
use toml::Value;

use crate::commands::{load_config, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut fields = Map::new();
    for (key, value, env_keys) in effective_values(&config) {
        let source = field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        fields.insert(key.to_string(), json!({ "value": value, "source": source }));
    }

    CommandResult::success_with_details(
        "config",
        "effective config (source precedence: env > file > default)",
        Some(JsonValue::Object(fields)),
    )
}

type FieldRow = (&'static str, String, &'static [&'static str]);

fn effective_values(config: &AppConfig) -> Vec<FieldRow> {
    let admins = config
        .chat
        .admin_user_ids
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let fallbacks = config
        .smart_reply
        .fallbacks
        .iter()
        .map(|(field, literal)| format!("{field}={literal}"))
        .collect::<Vec<_>>()
        .join(",");

    vec![
        row("database.url", config.database.url.clone(), &["NOVAXA_DATABASE_URL"]),
        row(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["NOVAXA_DATABASE_MAX_CONNECTIONS"],
        ),
        row(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["NOVAXA_DATABASE_TIMEOUT_SECS"],
        ),
        row("chat.transport", config.chat.transport.as_str().to_string(), &["NOVAXA_CHAT_TRANSPORT"]),
        row(
            "chat.bot_token",
            redact_token(config.chat.bot_token.expose_secret()),
            &["NOVAXA_CHAT_BOT_TOKEN", "BOT_TOKEN"],
        ),
        row("chat.api_base_url", config.chat.api_base_url.clone(), &["NOVAXA_CHAT_API_BASE_URL"]),
        row("chat.admin_user_ids", admins, &["NOVAXA_CHAT_ADMIN_USER_IDS"]),
        row("chat.worker_lanes", config.chat.worker_lanes.to_string(), &["NOVAXA_CHAT_WORKER_LANES"]),
        row(
            "chat.poll_timeout_secs",
            config.chat.poll_timeout_secs.to_string(),
            &["NOVAXA_CHAT_POLL_TIMEOUT_SECS"],
        ),
        row(
            "smart_reply.lookup_timeout_ms",
            config.smart_reply.lookup_timeout_ms.to_string(),
            &["NOVAXA_SMART_REPLY_LOOKUP_TIMEOUT_MS"],
        ),
        row(
            "smart_reply.regex_size_limit",
            config.smart_reply.regex_size_limit.to_string(),
            &["NOVAXA_SMART_REPLY_REGEX_SIZE_LIMIT"],
        ),
        row("smart_reply.fallbacks", fallbacks, &[]),
        row("server.bind_address", config.server.bind_address.clone(), &["NOVAXA_SERVER_BIND_ADDRESS"]),
        row(
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            &["NOVAXA_SERVER_HEALTH_CHECK_PORT"],
        ),
        row(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["NOVAXA_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        row(
            "logging.level",
            config.logging.level.clone(),
            &["NOVAXA_LOGGING_LEVEL", "NOVAXA_LOG_LEVEL"],
        ),
        row(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["NOVAXA_LOGGING_FORMAT", "NOVAXA_LOG_FORMAT"],
        ),
    ]
}

fn row(key: &'static str, value: String, env_keys: &'static [&'static str]) -> FieldRow {
    (key, value, env_keys)
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("novaxa.toml"), PathBuf::from("config/novaxa.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Keeps the public bot id before `:` and hides the secret half.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((bot_id, _)) = trimmed.split_once(':') {
        return format!("{bot_id}:***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_token};

    #[test]
    fn redaction_hides_secret_half() {
        assert_eq!(redact_token("123456:ABC-secret"), "123456:***");
        assert_eq!(redact_token("  "), "<empty>");
        assert_eq!(redact_token("opaque"), "<redacted>");
    }

    #[test]
    fn nested_keys_are_found_in_toml_documents() {
        let doc: toml::Value = "[chat]\nworker_lanes = 4\n".parse().expect("toml");

        assert!(contains_path(&doc, "chat.worker_lanes"));
        assert!(!contains_path(&doc, "chat.bot_token"));
        assert!(!contains_path(&doc, "database.url"));
    }
}
