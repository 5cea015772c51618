use serde_json::json;

use crate::commands::{load_config, with_database, CommandResult};
use novaxa_db::{migrations, SeedResult, SmartReplySeed};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = with_database("seed", &config, |pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = SmartReplySeed::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = SmartReplySeed::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        if verification.all_present {
            Ok(seeded)
        } else {
            Err(("seed_verification", failed_checks_message(&verification.checks), 6u8))
        }
    });

    match result {
        Ok(seeded) => CommandResult::success_with_details(
            "seed",
            "smart reply demo dataset loaded (greeting, pricing, regex pricing, name mention)",
            Some(seed_details(&seeded)),
        ),
        Err(failure) => failure,
    }
}

pub fn clean() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = with_database("seed", &config, |pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        SmartReplySeed::clean(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))
    });

    match result {
        Ok(()) => CommandResult::success("seed", "smart reply demo dataset removed"),
        Err(failure) => failure,
    }
}

fn seed_details(seeded: &SeedResult) -> serde_json::Value {
    json!({
        "triggers": seeded.triggers_seeded,
        "responses": seeded.responses_seeded,
        "customers": seeded.customers_seeded,
    })
}

fn failed_checks_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();

    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::failed_checks_message;

    #[test]
    fn verification_error_message_targets_failed_checks() {
        let checks = [
            ("seed-triggers", true),
            ("seed-active-triggers", false),
            ("seed-mappings-resolve", false),
        ];

        assert_eq!(
            failed_checks_message(&checks),
            "Seed verification failed for checks: seed-active-triggers, seed-mappings-resolve"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        let checks = [("seed-triggers", true), ("seed-customers", true)];

        assert_eq!(failed_checks_message(&checks), "Some seed data failed to load");
    }
}
