use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::customer::CustomerRecord;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("customer directory unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the CRM used to personalize replies.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn lookup(&self, user_id: i64) -> Result<Option<CustomerRecord>, DirectoryError>;
}

/// Looks a customer up within `timeout`. Errors and timeouts are logged and
/// reported as an absent record so rendering always completes.
pub async fn lookup_with_timeout(
    directory: &dyn CustomerDirectory,
    user_id: i64,
    timeout: Duration,
) -> Option<CustomerRecord> {
    match tokio::time::timeout(timeout, directory.lookup(user_id)).await {
        Ok(Ok(record)) => record,
        Ok(Err(error)) => {
            warn!(
                event_name = "crm.lookup.failed",
                user_id,
                error = %error,
                "customer lookup failed; rendering with fallbacks"
            );
            None
        }
        Err(_) => {
            warn!(
                event_name = "crm.lookup.timeout",
                user_id,
                timeout_ms = timeout.as_millis() as u64,
                "customer lookup timed out; rendering with fallbacks"
            );
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCustomerDirectory {
    records: RwLock<HashMap<i64, CustomerRecord>>,
}

impl InMemoryCustomerDirectory {
    pub fn new(records: impl IntoIterator<Item = CustomerRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|record| (record.user_id, record)).collect()),
        }
    }

    pub async fn upsert(&self, record: CustomerRecord) {
        self.records.write().await.insert(record.user_id, record);
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryCustomerDirectory {
    async fn lookup(&self, user_id: i64) -> Result<Option<CustomerRecord>, DirectoryError> {
        Ok(self.records.read().await.get(&user_id).cloned())
    }
}

/// Directory that never answers. Used when no CRM backend is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCustomerDirectory;

#[async_trait]
impl CustomerDirectory for NoopCustomerDirectory {
    async fn lookup(&self, _user_id: i64) -> Result<Option<CustomerRecord>, DirectoryError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{
        lookup_with_timeout, CustomerDirectory, DirectoryError, InMemoryCustomerDirectory,
    };
    use crate::domain::customer::CustomerRecord;

    struct FailingDirectory;

    #[async_trait]
    impl CustomerDirectory for FailingDirectory {
        async fn lookup(&self, _user_id: i64) -> Result<Option<CustomerRecord>, DirectoryError> {
            Err(DirectoryError::Unavailable("connection refused".to_owned()))
        }
    }

    struct SlowDirectory;

    #[async_trait]
    impl CustomerDirectory for SlowDirectory {
        async fn lookup(&self, user_id: i64) -> Result<Option<CustomerRecord>, DirectoryError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(CustomerRecord::new(user_id, "Late")))
        }
    }

    #[tokio::test]
    async fn in_memory_directory_returns_known_records() {
        let directory = InMemoryCustomerDirectory::new([CustomerRecord::new(1, "Maria")]);

        let found = lookup_with_timeout(&directory, 1, Duration::from_millis(50)).await;
        assert_eq!(found.map(|record| record.name), Some("Maria".to_owned()));
        assert_eq!(lookup_with_timeout(&directory, 2, Duration::from_millis(50)).await, None);
    }

    #[tokio::test]
    async fn lookup_errors_degrade_to_absent_record() {
        assert_eq!(lookup_with_timeout(&FailingDirectory, 1, Duration::from_millis(50)).await, None);
    }

    #[tokio::test]
    async fn lookup_timeout_degrades_to_absent_record() {
        assert_eq!(lookup_with_timeout(&SlowDirectory, 1, Duration::from_millis(50)).await, None);
    }
}
