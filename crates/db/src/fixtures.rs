use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_TRIGGER_IDS: &[&str] = &["TRG_001", "TRG_002", "TRG_003", "TRG_004", "TRG_005", "TRG_006"];

const SEED_RESPONSE_IDS: &[&str] = &["RES_001", "RES_002", "RES_003", "RES_004", "RES_005"];

const SEED_CUSTOMER_IDS: &[i64] = &[1001, 1002];

const SEED_ACTIVE_TRIGGERS: i64 = 5;

/// Demo smart-reply configuration: greeting, pricing in Greek and English,
/// a regex capture, a name mention answered with CRM details, and one
/// disabled trigger.
pub struct SmartReplySeed;

impl SmartReplySeed {
    pub const SQL: &str = include_str!("../../../config/fixtures/smart_reply_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            triggers_seeded: SEED_TRIGGER_IDS.len(),
            responses_seeded: SEED_RESPONSE_IDS.len(),
            customers_seeded: SEED_CUSTOMER_IDS.len(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let trigger_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM smart_reply_trigger WHERE id IN {}",
            sql_array_from_ids(SEED_TRIGGER_IDS)
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("seed-triggers", trigger_count == SEED_TRIGGER_IDS.len() as i64));

        let active_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM smart_reply_trigger WHERE active = 1 AND id IN {}",
            sql_array_from_ids(SEED_TRIGGER_IDS)
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("seed-active-triggers", active_count == SEED_ACTIVE_TRIGGERS));

        let response_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM smart_reply_response WHERE id IN {}",
            sql_array_from_ids(SEED_RESPONSE_IDS)
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("seed-responses", response_count == SEED_RESPONSE_IDS.len() as i64));

        let dangling: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM smart_reply_mapping m
             LEFT JOIN smart_reply_response r ON r.id = m.response_id
             WHERE r.id IS NULL",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("seed-mappings-resolve", dangling == 0));

        let mapped: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM smart_reply_mapping WHERE trigger_id IN {}",
            sql_array_from_ids(SEED_TRIGGER_IDS)
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("seed-every-trigger-mapped", mapped == SEED_TRIGGER_IDS.len() as i64));

        let customers: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM crm_customer WHERE user_id IN {}",
            sql_array_from_numbers(SEED_CUSTOMER_IDS)
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("seed-customers", customers == SEED_CUSTOMER_IDS.len() as i64));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        let triggers = sql_array_from_ids(SEED_TRIGGER_IDS);

        sqlx::query(&format!("DELETE FROM smart_reply_mapping WHERE trigger_id IN {triggers}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM smart_reply_trigger WHERE id IN {triggers}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "DELETE FROM smart_reply_response WHERE id IN {}",
            sql_array_from_ids(SEED_RESPONSE_IDS)
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "DELETE FROM crm_customer WHERE user_id IN {}",
            sql_array_from_numbers(SEED_CUSTOMER_IDS)
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

fn sql_array_from_numbers(ids: &[i64]) -> String {
    let joined = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
    format!("({joined})")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedResult {
    pub triggers_seeded: usize,
    pub responses_seeded: usize,
    pub customers_seeded: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use novaxa_core::smart_reply::{EngineSettings, SmartReplyEngine};

    use super::*;
    use crate::repositories::{SqlCustomerDirectory, SqlReplyStore};
    use crate::{connect_with_settings, migrations};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    #[test]
    fn sql_fixture_is_valid() {
        assert!(!SmartReplySeed::SQL.is_empty());
        for id in SEED_TRIGGER_IDS.iter().chain(SEED_RESPONSE_IDS) {
            assert!(SmartReplySeed::SQL.contains(&format!("'{id}'")), "missing {id}");
        }
    }

    #[tokio::test]
    async fn verify_seed_contract_and_idempotency() {
        let pool = setup_pool().await;

        let first = SmartReplySeed::load(&pool).await.expect("load seed fixtures");
        let first_verification = SmartReplySeed::verify(&pool).await.expect("verify seed");
        assert!(first_verification.all_present, "{:?}", first_verification.checks);

        let second = SmartReplySeed::load(&pool).await.expect("reload seed fixtures");
        let second_verification = SmartReplySeed::verify(&pool).await.expect("re-verify seed");
        assert!(second_verification.all_present);
        assert_eq!(first, second);
        assert_eq!(first_verification.checks, second_verification.checks);
    }

    #[tokio::test]
    async fn clean_removes_seeded_rows() {
        let pool = setup_pool().await;
        SmartReplySeed::load(&pool).await.expect("load");

        SmartReplySeed::clean(&pool).await.expect("clean");

        let verification = SmartReplySeed::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM smart_reply_mapping")
            .fetch_one(&pool)
            .await
            .expect("count mappings");
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn seeded_engine_answers_contract_conversations() {
        let pool = setup_pool().await;
        SmartReplySeed::load(&pool).await.expect("load");

        let engine = SmartReplyEngine::load(
            Arc::new(SqlReplyStore::new(pool.clone())),
            Arc::new(SqlCustomerDirectory::new(pool)),
            EngineSettings::default(),
        )
        .await
        .expect("engine");
        assert!(engine.consistency_report().is_empty(), "{:?}", engine.consistency_report());

        let contract: Value = serde_json::from_str(include_str!(
            "../../../config/fixtures/smart_reply_seed_contract.json"
        ))
        .expect("seed contract JSON must parse");

        for conversation in contract["conversations"].as_array().expect("conversations") {
            let user_id = conversation["user_id"].as_i64().expect("user_id");
            let text = conversation["text"].as_str().expect("text");
            let reply = engine.reply(user_id, text).await;

            assert_eq!(
                reply.as_ref().map(|reply| reply.trigger_id.0.as_str()),
                conversation["expected_trigger"].as_str(),
                "trigger for {text:?}"
            );
            assert_eq!(
                reply.as_ref().map(|reply| reply.text.as_str()),
                conversation["expected_reply"].as_str(),
                "reply for {text:?}"
            );
        }
    }
}
