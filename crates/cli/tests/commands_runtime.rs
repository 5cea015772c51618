use std::env;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use novaxa_cli::commands::{check, config, doctor, migrate, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_and_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    with_env(&[("NOVAXA_DATABASE_URL", database_url(dir.path()).as_str())], || {
        let first = migrate::run();
        assert_eq!(first.exit_code, 0, "expected successful migrate run: {}", first.output);
        let payload = parse_payload(&first.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["message"], "applied 2 pending migration(s)");

        let second = migrate::run();
        assert_eq!(parse_payload(&second.output)["message"], "schema is up to date");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_env() {
    with_env(&[("NOVAXA_DATABASE_MAX_CONNECTIONS", "many")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    with_env(&[("NOVAXA_DATABASE_URL", database_url(dir.path()).as_str())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success: {}", first.output);
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["details"]["triggers"], 6);
        assert_eq!(first_payload["details"]["customers"], 2);

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        assert_eq!(first_payload, parse_payload(&second.output));
    });
}

#[test]
fn check_reports_seeded_configuration_as_consistent() {
    let dir = tempfile::tempdir().expect("tempdir");
    with_env(&[("NOVAXA_DATABASE_URL", database_url(dir.path()).as_str())], || {
        assert_eq!(seed::run().exit_code, 0);

        let result = check::run();
        assert_eq!(result.exit_code, 0, "{}", result.output);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["details"]["triggers"], 6);
        assert_eq!(payload["details"]["active_triggers"], 5);
        assert_eq!(payload["details"]["issues"], Value::Array(Vec::new()));
    });
}

#[test]
fn check_on_cleaned_seed_reports_empty_configuration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(dir.path());
    with_env(&[("NOVAXA_DATABASE_URL", url.as_str())], || {
        assert_eq!(seed::run().exit_code, 0);
        assert_eq!(seed::clean().exit_code, 0);

        let empty = check::run();
        assert_eq!(empty.exit_code, 0, "an empty configuration is consistent");
        assert_eq!(parse_payload(&empty.output)["details"]["triggers"], 0);
    });
}

#[test]
fn config_redacts_bot_token_and_attributes_sources() {
    with_env(
        &[
            ("NOVAXA_CHAT_TRANSPORT", "telegram"),
            ("NOVAXA_CHAT_BOT_TOKEN", "123456:AAH-super-secret-token-value"),
            ("NOVAXA_CHAT_ADMIN_USER_IDS", "900,901"),
        ],
        || {
            let result = config::run();
            assert_eq!(result.exit_code, 0, "{}", result.output);
            assert!(!result.output.contains("super-secret"));

            let payload = parse_payload(&result.output);
            let fields = &payload["details"];
            assert_eq!(fields["chat.bot_token"]["value"], "123456:***");
            assert_eq!(fields["chat.bot_token"]["source"], "env (NOVAXA_CHAT_BOT_TOKEN)");
            assert_eq!(fields["chat.admin_user_ids"]["value"], "900,901");
            assert_eq!(fields["chat.worker_lanes"]["source"], "default");
        },
    );
}

#[test]
fn doctor_passes_after_migrate_and_fails_before() {
    let dir = tempfile::tempdir().expect("tempdir");
    with_env(&[("NOVAXA_DATABASE_URL", database_url(dir.path()).as_str())], || {
        let before = doctor::run();
        assert_eq!(before.exit_code, 9, "{}", before.output);
        let payload = parse_payload(&before.output);
        assert_eq!(payload["error_class"], "readiness");
        assert_eq!(check_status(&payload, "schema_migrations"), "fail");
        assert_eq!(check_status(&payload, "bot_token_readiness"), "skipped");

        assert_eq!(migrate::run().exit_code, 0);

        let after = doctor::run();
        assert_eq!(after.exit_code, 0, "{}", after.output);
        assert_eq!(check_status(&parse_payload(&after.output), "database_connectivity"), "pass");
    });
}

#[test]
fn doctor_reports_config_failure_and_skips_the_rest() {
    with_env(&[("NOVAXA_CHAT_TRANSPORT", "telegram")], || {
        let result = doctor::run();
        assert_eq!(result.exit_code, 9);

        let payload = parse_payload(&result.output);
        assert_eq!(check_status(&payload, "config_validation"), "fail");
        assert_eq!(check_status(&payload, "database_connectivity"), "skipped");
    });
}

fn check_status(payload: &Value, name: &str) -> String {
    payload["details"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or("missing")
        .to_string()
}

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("novaxa.db").display())
}

fn parse_payload(output: &str) -> Value {
    assert_eq!(output.lines().count(), 1, "commands print one JSON line");
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "NOVAXA_DATABASE_URL",
        "NOVAXA_DATABASE_MAX_CONNECTIONS",
        "NOVAXA_DATABASE_TIMEOUT_SECS",
        "NOVAXA_CHAT_TRANSPORT",
        "NOVAXA_CHAT_BOT_TOKEN",
        "BOT_TOKEN",
        "NOVAXA_CHAT_API_BASE_URL",
        "NOVAXA_CHAT_ADMIN_USER_IDS",
        "NOVAXA_CHAT_WORKER_LANES",
        "NOVAXA_CHAT_POLL_TIMEOUT_SECS",
        "NOVAXA_SMART_REPLY_LOOKUP_TIMEOUT_MS",
        "NOVAXA_SMART_REPLY_REGEX_SIZE_LIMIT",
        "NOVAXA_SERVER_BIND_ADDRESS",
        "NOVAXA_SERVER_HEALTH_CHECK_PORT",
        "NOVAXA_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "NOVAXA_LOGGING_LEVEL",
        "NOVAXA_LOGGING_FORMAT",
        "NOVAXA_LOG_LEVEL",
        "NOVAXA_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
