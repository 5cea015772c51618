use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use novaxa_core::domain::mapping::Mapping;
use novaxa_core::domain::response::{ReplyFormat, Response, ResponseId};
use novaxa_core::domain::trigger::{MatchKind, Trigger, TriggerId};
use novaxa_core::smart_reply::{ReplyStore, StoreError, StoredConfiguration};

use super::{parse_timestamp, RepositoryError};
use crate::DbPool;

/// Smart-reply configuration persisted in the `smart_reply_*` tables.
#[derive(Clone)]
pub struct SqlReplyStore {
    pool: DbPool,
}

impl SqlReplyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list_triggers(&self) -> Result<Vec<Trigger>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, pattern, match_kind, intent, active, sequence, created_at, updated_at
             FROM smart_reply_trigger
             ORDER BY sequence ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(trigger_from_row).collect()
    }

    pub async fn list_responses(&self) -> Result<Vec<Response>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, template, format, created_at, updated_at
             FROM smart_reply_response
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(response_from_row).collect()
    }

    pub async fn list_mappings(&self) -> Result<Vec<Mapping>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT trigger_id, response_id, updated_at
             FROM smart_reply_mapping
             ORDER BY trigger_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(mapping_from_row).collect()
    }

    pub async fn count_active_triggers(&self) -> Result<i64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM smart_reply_trigger WHERE active = 1")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn upsert_trigger(&self, trigger: &Trigger) -> Result<(), RepositoryError> {
        let sequence = i64::try_from(trigger.sequence).map_err(|_| {
            RepositoryError::Decode(format!("trigger sequence {} out of range", trigger.sequence))
        })?;

        sqlx::query(
            "INSERT INTO smart_reply_trigger
                (id, pattern, match_kind, intent, active, sequence, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                pattern = excluded.pattern,
                match_kind = excluded.match_kind,
                intent = excluded.intent,
                active = excluded.active,
                updated_at = excluded.updated_at",
        )
        .bind(&trigger.id.0)
        .bind(&trigger.pattern)
        .bind(trigger.match_kind.as_str())
        .bind(&trigger.intent)
        .bind(trigger.active)
        .bind(sequence)
        .bind(trigger.created_at.to_rfc3339())
        .bind(trigger.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_response(&self, response: &Response) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO smart_reply_response (id, template, format, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                template = excluded.template,
                format = excluded.format,
                updated_at = excluded.updated_at",
        )
        .bind(&response.id.0)
        .bind(&response.template)
        .bind(response.format.as_str())
        .bind(response.created_at.to_rfc3339())
        .bind(response.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_mapping(&self, mapping: &Mapping) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO smart_reply_mapping (trigger_id, response_id, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(trigger_id) DO UPDATE SET
                response_id = excluded.response_id,
                updated_at = excluded.updated_at",
        )
        .bind(&mapping.trigger_id.0)
        .bind(&mapping.response_id.0)
        .bind(mapping.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_where(&self, sql: &str, id: &str) -> Result<(), RepositoryError> {
        sqlx::query(sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ReplyStore for SqlReplyStore {
    async fn load(&self) -> Result<StoredConfiguration, StoreError> {
        Ok(StoredConfiguration {
            triggers: self.list_triggers().await?,
            responses: self.list_responses().await?,
            mappings: self.list_mappings().await?,
        })
    }

    async fn save_trigger(&self, trigger: &Trigger) -> Result<(), StoreError> {
        Ok(self.upsert_trigger(trigger).await?)
    }

    async fn delete_trigger(&self, id: &TriggerId) -> Result<(), StoreError> {
        Ok(self.delete_where("DELETE FROM smart_reply_trigger WHERE id = ?", &id.0).await?)
    }

    async fn save_response(&self, response: &Response) -> Result<(), StoreError> {
        Ok(self.upsert_response(response).await?)
    }

    async fn delete_response(&self, id: &ResponseId) -> Result<(), StoreError> {
        Ok(self.delete_where("DELETE FROM smart_reply_response WHERE id = ?", &id.0).await?)
    }

    async fn save_mapping(&self, mapping: &Mapping) -> Result<(), StoreError> {
        Ok(self.upsert_mapping(mapping).await?)
    }

    async fn delete_mapping(&self, trigger_id: &TriggerId) -> Result<(), StoreError> {
        Ok(self
            .delete_where("DELETE FROM smart_reply_mapping WHERE trigger_id = ?", &trigger_id.0)
            .await?)
    }
}

fn trigger_from_row(row: SqliteRow) -> Result<Trigger, RepositoryError> {
    let match_kind: String = row.try_get("match_kind")?;
    let sequence: i64 = row.try_get("sequence")?;

    Ok(Trigger {
        id: TriggerId(row.try_get("id")?),
        pattern: row.try_get("pattern")?,
        match_kind: match_kind
            .parse::<MatchKind>()
            .map_err(|error| RepositoryError::Decode(error.to_string()))?,
        intent: row.try_get("intent")?,
        active: row.try_get("active")?,
        sequence: u64::try_from(sequence).map_err(|_| {
            RepositoryError::Decode(format!("negative trigger sequence `{sequence}`"))
        })?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn response_from_row(row: SqliteRow) -> Result<Response, RepositoryError> {
    let format: String = row.try_get("format")?;

    Ok(Response {
        id: ResponseId(row.try_get("id")?),
        template: row.try_get("template")?,
        format: format
            .parse::<ReplyFormat>()
            .map_err(|error| RepositoryError::Decode(error.to_string()))?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn mapping_from_row(row: SqliteRow) -> Result<Mapping, RepositoryError> {
    Ok(Mapping {
        trigger_id: TriggerId(row.try_get("trigger_id")?),
        response_id: ResponseId(row.try_get("response_id")?),
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
