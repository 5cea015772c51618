use chrono::{DateTime, Utc};
use thiserror::Error;

use novaxa_core::directory::DirectoryError;
use novaxa_core::smart_reply::StoreError;

pub mod customer;
pub mod smart_reply;

pub use customer::SqlCustomerDirectory;
pub use smart_reply::SqlReplyStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        StoreError(error.to_string())
    }
}

impl From<RepositoryError> for DirectoryError {
    fn from(error: RepositoryError) -> Self {
        DirectoryError::Unavailable(error.to_string())
    }
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
