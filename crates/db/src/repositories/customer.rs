use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use novaxa_core::directory::{CustomerDirectory, DirectoryError};
use novaxa_core::domain::customer::{CustomerRecord, CustomerStatus};

use super::RepositoryError;
use crate::DbPool;

/// CRM records backed by the `crm_customer` table.
#[derive(Clone)]
pub struct SqlCustomerDirectory {
    pool: DbPool,
}

impl SqlCustomerDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_user_id(
        &self,
        user_id: i64,
    ) -> Result<Option<CustomerRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, name, email, status, notes_json, project_tags_json
             FROM crm_customer
             WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(customer_from_row).transpose()
    }

    pub async fn list(&self) -> Result<Vec<CustomerRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT user_id, name, email, status, notes_json, project_tags_json
             FROM crm_customer
             ORDER BY user_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(customer_from_row).collect()
    }

    pub async fn save(&self, record: &CustomerRecord) -> Result<(), RepositoryError> {
        let notes_json = serde_json::to_string(&record.notes)
            .map_err(|error| RepositoryError::Decode(format!("notes: {error}")))?;
        let tags_json = serde_json::to_string(&record.project_tags)
            .map_err(|error| RepositoryError::Decode(format!("project tags: {error}")))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO crm_customer
                (user_id, name, email, status, notes_json, project_tags_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                status = excluded.status,
                notes_json = excluded.notes_json,
                project_tags_json = excluded.project_tags_json,
                updated_at = excluded.updated_at",
        )
        .bind(record.user_id)
        .bind(&record.name)
        .bind(&record.email)
        .bind(record.status.label())
        .bind(notes_json)
        .bind(tags_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete(&self, user_id: i64) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM crm_customer WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CustomerDirectory for SqlCustomerDirectory {
    async fn lookup(&self, user_id: i64) -> Result<Option<CustomerRecord>, DirectoryError> {
        Ok(self.find_by_user_id(user_id).await?)
    }
}

fn customer_from_row(row: SqliteRow) -> Result<CustomerRecord, RepositoryError> {
    let status: String = row.try_get("status")?;
    let notes_json: String = row.try_get("notes_json")?;
    let tags_json: String = row.try_get("project_tags_json")?;

    let notes: Vec<String> = serde_json::from_str(&notes_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid `notes_json`: {error}")))?;
    let project_tags: BTreeSet<String> = serde_json::from_str(&tags_json).map_err(|error| {
        RepositoryError::Decode(format!("invalid `project_tags_json`: {error}"))
    })?;

    Ok(CustomerRecord {
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        status: CustomerStatus::parse(&status),
        notes,
        project_tags,
    })
}
