use novaxa_core::config::{looks_like_bot_token, AppConfig, ChatTransportKind};
use novaxa_db::{connect_with_config, migrations};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::{load_config, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

pub fn run() -> CommandResult {
    let checks = build_checks();
    let details = serde_json::to_value(&checks).ok();

    if checks.iter().any(|check| check.status == CheckStatus::Fail) {
        let failed = checks
            .iter()
            .filter(|check| check.status == CheckStatus::Fail)
            .map(|check| check.name)
            .collect::<Vec<_>>();
        return CommandResult::failure_with_details(
            "doctor",
            "readiness",
            format!("doctor: failed checks: {}", failed.join(", ")),
            9,
            details,
        );
    }

    CommandResult::success_with_details("doctor", "doctor: all readiness checks passed", details)
}

fn build_checks() -> Vec<DoctorCheck> {
    match load_config("doctor") {
        Ok(config) => {
            let mut checks = vec![DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            }];
            checks.push(check_bot_token(&config));
            checks.extend(check_database(&config));
            checks
        }
        Err(failure) => {
            let skipped = |name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            };
            vec![
                DoctorCheck {
                    name: "config_validation",
                    status: CheckStatus::Fail,
                    details: failure_message(&failure),
                },
                skipped("bot_token_readiness"),
                skipped("database_connectivity"),
                skipped("schema_migrations"),
            ]
        }
    }
}

fn failure_message(failure: &CommandResult) -> String {
    serde_json::from_str::<serde_json::Value>(&failure.output)
        .ok()
        .and_then(|payload| payload["message"].as_str().map(str::to_owned))
        .unwrap_or_else(|| failure.output.clone())
}

fn check_bot_token(config: &AppConfig) -> DoctorCheck {
    let name = "bot_token_readiness";
    match config.chat.transport {
        ChatTransportKind::Noop => DoctorCheck {
            name,
            status: CheckStatus::Skipped,
            details: "noop transport does not use a bot token".to_string(),
        },
        ChatTransportKind::Telegram if looks_like_bot_token(config.chat.bot_token.expose_secret()) => {
            DoctorCheck {
                name,
                status: CheckStatus::Pass,
                details: "telegram bot token has the expected `<bot id>:<secret>` shape".to_string(),
            }
        }
        ChatTransportKind::Telegram => DoctorCheck {
            name,
            status: CheckStatus::Fail,
            details: "telegram bot token is missing or malformed".to_string(),
        },
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    DoctorCheck {
                        name: "schema_migrations",
                        status: CheckStatus::Skipped,
                        details: "skipped because the database is unreachable".to_string(),
                    },
                ];
            }
        };

        let connectivity = DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        };
        let schema = match migrations::pending_count(&pool).await {
            Ok(0) => DoctorCheck {
                name: "schema_migrations",
                status: CheckStatus::Pass,
                details: "all migrations applied".to_string(),
            },
            Ok(pending) => DoctorCheck {
                name: "schema_migrations",
                status: CheckStatus::Fail,
                details: format!("{pending} pending migration(s); run `novaxa migrate`"),
            },
            Err(error) => DoctorCheck {
                name: "schema_migrations",
                status: CheckStatus::Fail,
                details: format!("failed to inspect migrations: {error}"),
            },
        };

        pool.close().await;
        vec![connectivity, schema]
    })
}
