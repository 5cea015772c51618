use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::mapping::Mapping;
use crate::domain::response::{Response, ResponseId};
use crate::domain::trigger::{Trigger, TriggerId};
use crate::errors::ApplicationError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("smart reply store failure: {0}")]
pub struct StoreError(pub String);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoredConfiguration {
    pub triggers: Vec<Trigger>,
    pub responses: Vec<Response>,
    pub mappings: Vec<Mapping>,
}

/// Durable home of triggers, responses and mappings. Every engine mutation
/// is written here before it becomes visible to readers.
#[async_trait]
pub trait ReplyStore: Send + Sync {
    async fn load(&self) -> Result<StoredConfiguration, StoreError>;
    async fn save_trigger(&self, trigger: &Trigger) -> Result<(), StoreError>;
    async fn delete_trigger(&self, id: &TriggerId) -> Result<(), StoreError>;
    async fn save_response(&self, response: &Response) -> Result<(), StoreError>;
    async fn delete_response(&self, id: &ResponseId) -> Result<(), StoreError>;
    async fn save_mapping(&self, mapping: &Mapping) -> Result<(), StoreError>;
    async fn delete_mapping(&self, trigger_id: &TriggerId) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryReplyStore {
    state: RwLock<StoredConfiguration>,
}

impl InMemoryReplyStore {
    pub fn new(initial: StoredConfiguration) -> Self {
        Self { state: RwLock::new(initial) }
    }

    pub async fn snapshot(&self) -> StoredConfiguration {
        self.state.read().await.clone()
    }
}

fn upsert<T, K: PartialEq>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> &K) {
    match items.iter().position(|existing| key(existing) == key(&item)) {
        Some(index) => items[index] = item,
        None => items.push(item),
    }
}

#[async_trait]
impl ReplyStore for InMemoryReplyStore {
    async fn load(&self) -> Result<StoredConfiguration, StoreError> {
        Ok(self.snapshot().await)
    }

    async fn save_trigger(&self, trigger: &Trigger) -> Result<(), StoreError> {
        upsert(&mut self.state.write().await.triggers, trigger.clone(), |t| &t.id);
        Ok(())
    }

    async fn delete_trigger(&self, id: &TriggerId) -> Result<(), StoreError> {
        self.state.write().await.triggers.retain(|trigger| &trigger.id != id);
        Ok(())
    }

    async fn save_response(&self, response: &Response) -> Result<(), StoreError> {
        upsert(&mut self.state.write().await.responses, response.clone(), |r| &r.id);
        Ok(())
    }

    async fn delete_response(&self, id: &ResponseId) -> Result<(), StoreError> {
        self.state.write().await.responses.retain(|response| &response.id != id);
        Ok(())
    }

    async fn save_mapping(&self, mapping: &Mapping) -> Result<(), StoreError> {
        upsert(&mut self.state.write().await.mappings, mapping.clone(), |m| &m.trigger_id);
        Ok(())
    }

    async fn delete_mapping(&self, trigger_id: &TriggerId) -> Result<(), StoreError> {
        self.state.write().await.mappings.retain(|mapping| &mapping.trigger_id != trigger_id);
        Ok(())
    }
}

impl From<StoreError> for ApplicationError {
    fn from(error: StoreError) -> Self {
        Self::Persistence(error.0)
    }
}
