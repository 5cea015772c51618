use std::sync::Arc;

use novaxa_core::directory::NoopCustomerDirectory;
use novaxa_core::smart_reply::{ConfigurationIssue, EngineSettings, SmartReplyEngine};
use novaxa_db::{migrations, SqlReplyStore};
use serde_json::json;

use crate::commands::{load_config, with_database, CommandResult};

struct CheckSummary {
    triggers: usize,
    active_triggers: usize,
    responses: usize,
    mappings: usize,
    issues: Vec<ConfigurationIssue>,
}

pub fn run() -> CommandResult {
    let config = match load_config("check") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let settings = match EngineSettings::from_config(&config.smart_reply) {
        Ok(settings) => settings,
        Err(error) => {
            return CommandResult::failure("check", "config_validation", error.to_string(), 2);
        }
    };

    let result = with_database("check", &config, |pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        // Customer data plays no part in consistency.
        let engine = SmartReplyEngine::load(
            Arc::new(SqlReplyStore::new(pool)),
            Arc::new(NoopCustomerDirectory),
            settings,
        )
        .await
        .map_err(|error| ("engine_load", error.to_string(), 7u8))?;

        let triggers = engine.list_triggers();
        Ok(CheckSummary {
            active_triggers: triggers.iter().filter(|trigger| trigger.active).count(),
            triggers: triggers.len(),
            responses: engine.list_responses().len(),
            mappings: engine.list_mappings().len(),
            issues: engine.consistency_report(),
        })
    });

    let summary = match result {
        Ok(summary) => summary,
        Err(failure) => return failure,
    };

    let details = json!({
        "triggers": summary.triggers,
        "active_triggers": summary.active_triggers,
        "responses": summary.responses,
        "mappings": summary.mappings,
        "issues": summary.issues,
    });

    if summary.issues.is_empty() {
        CommandResult::success_with_details("check", "configuration is consistent", Some(details))
    } else {
        let lines = summary.issues.iter().map(ToString::to_string).collect::<Vec<_>>();
        CommandResult::failure_with_details(
            "check",
            "configuration_issues",
            format!("{} issue(s): {}", lines.len(), lines.join("; ")),
            8,
            Some(details),
        )
    }
}
