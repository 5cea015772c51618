use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::config::SmartReplyConfig;
use crate::directory::CustomerDirectory;
use crate::domain::mapping::Mapping;
use crate::domain::next_sequential_id;
use crate::domain::response::{NewResponse, ReplyFormat, Response, ResponseId, ResponseUpdate};
use crate::domain::trigger::{NewTrigger, Trigger, TriggerId, TriggerUpdate};
use crate::errors::{ApplicationError, DomainError};
use crate::smart_reply::catalog::{
    consistency_report, resolve, ConfigurationIssue, MappingTable, Resolution, ResponseCatalog,
};
use crate::smart_reply::pattern::PatternCompiler;
use crate::smart_reply::personalizer::{FallbackLiterals, Personalizer};
use crate::smart_reply::registry::{RegisteredTrigger, TriggerRegistry};
use crate::smart_reply::store::{ReplyStore, StoredConfiguration};

const TRIGGER_ID_PREFIX: &str = "TRG";
const RESPONSE_ID_PREFIX: &str = "RES";
const ENGINE_ACTOR: &str = "smart-reply-engine";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub lookup_timeout: Duration,
    pub regex_size_limit: usize,
    pub fallbacks: FallbackLiterals,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let config = SmartReplyConfig::default();
        Self {
            lookup_timeout: Duration::from_millis(config.lookup_timeout_ms),
            regex_size_limit: config.regex_size_limit,
            fallbacks: FallbackLiterals::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &SmartReplyConfig) -> Result<Self, DomainError> {
        Ok(Self {
            lookup_timeout: Duration::from_millis(config.lookup_timeout_ms),
            regex_size_limit: config.regex_size_limit,
            fallbacks: FallbackLiterals::from_config(&config.fallbacks)?,
        })
    }
}

/// A rendered reply together with what produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmartReply {
    pub text: String,
    pub trigger_id: TriggerId,
    pub response_id: ResponseId,
    pub format: ReplyFormat,
}

/// Immutable view of the configuration that message handling reads from.
#[derive(Clone, Debug, Default)]
pub struct ReplySnapshot {
    pub registry: TriggerRegistry,
    pub catalog: ResponseCatalog,
    pub mappings: MappingTable,
}

impl ReplySnapshot {
    fn from_stored(stored: StoredConfiguration, compiler: &PatternCompiler) -> Self {
        Self {
            registry: TriggerRegistry::from_triggers(stored.triggers, compiler),
            catalog: ResponseCatalog::from_responses(stored.responses),
            mappings: MappingTable::from_mappings(stored.mappings),
        }
    }

    fn next_trigger_id(&self) -> TriggerId {
        let taken = self
            .registry
            .triggers()
            .map(|trigger| trigger.id.0.as_str())
            .chain(self.mappings.mappings().map(|mapping| mapping.trigger_id.0.as_str()));
        TriggerId(next_sequential_id(TRIGGER_ID_PREFIX, taken))
    }

    fn next_response_id(&self) -> ResponseId {
        let taken = self
            .catalog
            .responses()
            .map(|response| response.id.0.as_str())
            .chain(self.mappings.mappings().map(|mapping| mapping.response_id.0.as_str()));
        ResponseId(next_sequential_id(RESPONSE_ID_PREFIX, taken))
    }

    fn trigger(&self, id: &TriggerId) -> Result<&Trigger, DomainError> {
        self.registry.get(id).ok_or_else(|| DomainError::UnknownTrigger(id.clone()))
    }

    fn response(&self, id: &ResponseId) -> Result<&Response, DomainError> {
        self.catalog.get(id).ok_or_else(|| DomainError::UnknownResponse(id.clone()))
    }
}

enum Persist {
    SaveTrigger(Trigger),
    DeleteTrigger(TriggerId),
    SaveResponse(Response),
    DeleteResponse(ResponseId),
    SaveMapping(Mapping),
    DeleteMapping(TriggerId),
}

impl Persist {
    fn operation(&self) -> &'static str {
        match self {
            Self::SaveTrigger(_) => "save_trigger",
            Self::DeleteTrigger(_) => "delete_trigger",
            Self::SaveResponse(_) => "save_response",
            Self::DeleteResponse(_) => "delete_response",
            Self::SaveMapping(_) => "save_mapping",
            Self::DeleteMapping(_) => "delete_mapping",
        }
    }
}

pub struct SmartReplyEngine {
    snapshot: RwLock<Arc<ReplySnapshot>>,
    writer: tokio::sync::Mutex<()>,
    store: Arc<dyn ReplyStore>,
    directory: Arc<dyn CustomerDirectory>,
    compiler: PatternCompiler,
    personalizer: Personalizer,
    lookup_timeout: Duration,
    reported_dangling: Mutex<HashSet<(TriggerId, ResponseId)>>,
    audit: Arc<dyn AuditSink>,
}

impl SmartReplyEngine {
    /// Loads persisted configuration and builds the first snapshot.
    pub async fn load(
        store: Arc<dyn ReplyStore>,
        directory: Arc<dyn CustomerDirectory>,
        settings: EngineSettings,
    ) -> Result<Self, ApplicationError> {
        let compiler = PatternCompiler::new(settings.regex_size_limit);
        let stored = store.load().await?;
        let snapshot = ReplySnapshot::from_stored(stored, &compiler);

        info!(
            event_name = "smart_reply.engine.loaded",
            triggers = snapshot.registry.len(),
            responses = snapshot.catalog.len(),
            mappings = snapshot.mappings.len(),
            "smart reply configuration loaded"
        );

        let engine = Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            writer: tokio::sync::Mutex::new(()),
            store,
            directory,
            compiler,
            personalizer: Personalizer::new(settings.fallbacks),
            lookup_timeout: settings.lookup_timeout,
            reported_dangling: Mutex::new(HashSet::new()),
            audit: Arc::new(TracingAuditSink),
        };
        Ok(engine)
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Logs every configuration issue present at startup. Dangling mappings
    /// count as reported so message handling does not warn about them again.
    pub fn report_startup_issues(&self) -> Vec<ConfigurationIssue> {
        let issues = self.consistency_report();
        for issue in &issues {
            match issue {
                ConfigurationIssue::DanglingResponse { trigger_id, response_id } => {
                    self.report_dangling(trigger_id, response_id, None);
                }
                other => warn!(
                    event_name = "smart_reply.config.issue",
                    issue = %other,
                    "smart reply configuration issue"
                ),
            }
        }
        issues
    }

    pub fn snapshot(&self) -> Arc<ReplySnapshot> {
        match self.snapshot.read() {
            Ok(current) => Arc::clone(&current),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn swap(&self, next: ReplySnapshot) {
        let next = Arc::new(next);
        match self.snapshot.write() {
            Ok(mut current) => *current = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    pub async fn handle_message(&self, user_id: i64, text: &str) -> Option<String> {
        self.reply(user_id, text).await.map(|reply| reply.text)
    }

    pub async fn reply(&self, user_id: i64, text: &str) -> Option<SmartReply> {
        let snapshot = self.snapshot();
        let found = snapshot.registry.find(text)?;

        let response = match resolve(&found.trigger_id, &snapshot.mappings, &snapshot.catalog) {
            Resolution::Resolved(response) => response,
            Resolution::Unmapped => {
                debug!(
                    event_name = "smart_reply.trigger.unmapped",
                    user_id,
                    trigger_id = %found.trigger_id,
                    "matched trigger has no response mapped"
                );
                return None;
            }
            Resolution::Dangling { response_id } => {
                self.report_dangling(&found.trigger_id, &response_id, Some(user_id));
                return None;
            }
        };

        let text = self
            .personalizer
            .render(
                &response.template,
                user_id,
                self.directory.as_ref(),
                self.lookup_timeout,
                response.format,
                Some(&found.captures),
            )
            .await;

        debug!(
            event_name = "smart_reply.matched",
            user_id,
            trigger_id = %found.trigger_id,
            response_id = %response.id,
            match_kind = %found.match_kind,
            "smart reply rendered"
        );

        Some(SmartReply {
            text,
            trigger_id: found.trigger_id,
            response_id: response.id.clone(),
            format: response.format,
        })
    }

    fn report_dangling(&self, trigger_id: &TriggerId, response_id: &ResponseId, user_id: Option<i64>) {
        let first_time = match self.reported_dangling.lock() {
            Ok(mut reported) => reported.insert((trigger_id.clone(), response_id.clone())),
            Err(poisoned) => poisoned.into_inner().insert((trigger_id.clone(), response_id.clone())),
        };
        if !first_time {
            return;
        }

        warn!(
            event_name = "smart_reply.mapping.dangling",
            trigger_id = %trigger_id,
            response_id = %response_id,
            "mapping points at a missing response; trigger stays silent"
        );
        self.audit.emit(
            AuditEvent::new(
                user_id,
                Uuid::new_v4().to_string(),
                "smart_reply.mapping.dangling",
                AuditCategory::Configuration,
                ENGINE_ACTOR,
                AuditOutcome::Rejected,
            )
            .with_metadata("trigger_id", trigger_id.to_string())
            .with_metadata("response_id", response_id.to_string()),
        );
    }

    fn forget_dangling(&self, trigger_id: &TriggerId) {
        match self.reported_dangling.lock() {
            Ok(mut reported) => reported.retain(|(reported_id, _)| reported_id != trigger_id),
            Err(poisoned) => {
                poisoned.into_inner().retain(|(reported_id, _)| reported_id != trigger_id)
            }
        }
    }

    /// Serializes writers, applies `edit` to a copy of the current snapshot,
    /// persists the change and only then publishes the copy.
    async fn commit<T, F>(&self, edit: F) -> Result<T, ApplicationError>
    where
        F: FnOnce(&mut ReplySnapshot) -> Result<(T, Persist), ApplicationError>,
    {
        let _writer = self.writer.lock().await;
        let mut next = ReplySnapshot::clone(&self.snapshot());
        let (value, persist) = edit(&mut next)?;
        self.persist(persist).await?;
        self.swap(next);
        Ok(value)
    }

    async fn persist(&self, persist: Persist) -> Result<(), ApplicationError> {
        let result = match &persist {
            Persist::SaveTrigger(trigger) => self.store.save_trigger(trigger).await,
            Persist::DeleteTrigger(id) => self.store.delete_trigger(id).await,
            Persist::SaveResponse(response) => self.store.save_response(response).await,
            Persist::DeleteResponse(id) => self.store.delete_response(id).await,
            Persist::SaveMapping(mapping) => self.store.save_mapping(mapping).await,
            Persist::DeleteMapping(trigger_id) => self.store.delete_mapping(trigger_id).await,
        };

        result.map_err(|store_error| {
            error!(
                event_name = "smart_reply.persist.failed",
                operation = persist.operation(),
                error = %store_error,
                "smart reply change was not persisted; snapshot unchanged"
            );
            self.audit.emit(
                AuditEvent::new(
                    None,
                    Uuid::new_v4().to_string(),
                    "smart_reply.persist.failed",
                    AuditCategory::Persistence,
                    ENGINE_ACTOR,
                    AuditOutcome::Failed,
                )
                .with_metadata("operation", persist.operation())
                .with_metadata("error", store_error.to_string()),
            );
            ApplicationError::from(store_error)
        })
    }

    fn audit_change(&self, event_type: &str, metadata: &[(&str, String)]) {
        let event = metadata.iter().fold(
            AuditEvent::new(
                None,
                Uuid::new_v4().to_string(),
                event_type,
                AuditCategory::Configuration,
                ENGINE_ACTOR,
                AuditOutcome::Success,
            ),
            |event, (key, value)| event.with_metadata(*key, value.clone()),
        );
        self.audit.emit(event);
    }

    pub async fn add_trigger(&self, new: NewTrigger) -> Result<Trigger, ApplicationError> {
        let trigger = self
            .commit(|snapshot| {
                let now = Utc::now();
                let trigger = Trigger {
                    id: snapshot.next_trigger_id(),
                    pattern: new.pattern,
                    match_kind: new.match_kind,
                    intent: new.intent,
                    active: new.active,
                    sequence: snapshot.registry.next_sequence(),
                    created_at: now,
                    updated_at: now,
                };
                let entry = RegisteredTrigger::compile(trigger.clone(), &self.compiler)?;
                snapshot.registry.insert(entry)?;
                Ok((trigger.clone(), Persist::SaveTrigger(trigger)))
            })
            .await?;

        self.audit_change(
            "smart_reply.trigger.added",
            &[
                ("trigger_id", trigger.id.to_string()),
                ("match_kind", trigger.match_kind.to_string()),
            ],
        );
        Ok(trigger)
    }

    /// Replaces pattern, kind and intent. Position, activity and creation
    /// time are kept.
    pub async fn update_trigger(
        &self,
        id: &TriggerId,
        update: TriggerUpdate,
    ) -> Result<Trigger, ApplicationError> {
        let trigger = self
            .commit(|snapshot| {
                let mut trigger = snapshot.trigger(id)?.clone();
                trigger.pattern = update.pattern;
                trigger.match_kind = update.match_kind;
                trigger.intent = update.intent;
                trigger.updated_at = Utc::now();

                let entry = RegisteredTrigger::compile(trigger.clone(), &self.compiler)?;
                snapshot.registry.replace(entry)?;
                Ok((trigger.clone(), Persist::SaveTrigger(trigger)))
            })
            .await?;

        self.audit_change("smart_reply.trigger.updated", &[("trigger_id", trigger.id.to_string())]);
        Ok(trigger)
    }

    pub async fn deactivate_trigger(&self, id: &TriggerId) -> Result<Trigger, ApplicationError> {
        self.set_trigger_active(id, false).await
    }

    pub async fn activate_trigger(&self, id: &TriggerId) -> Result<Trigger, ApplicationError> {
        self.set_trigger_active(id, true).await
    }

    async fn set_trigger_active(
        &self,
        id: &TriggerId,
        active: bool,
    ) -> Result<Trigger, ApplicationError> {
        let trigger = self
            .commit(|snapshot| {
                let trigger = snapshot.registry.set_active(id, active)?.clone();
                Ok((trigger.clone(), Persist::SaveTrigger(trigger)))
            })
            .await?;

        let event_type =
            if active { "smart_reply.trigger.activated" } else { "smart_reply.trigger.deactivated" };
        self.audit_change(event_type, &[("trigger_id", trigger.id.to_string())]);
        Ok(trigger)
    }

    /// Removes the trigger only. Its mapping stays behind and shows up in the
    /// consistency report.
    pub async fn remove_trigger(&self, id: &TriggerId) -> Result<Trigger, ApplicationError> {
        let trigger = self
            .commit(|snapshot| {
                let trigger = snapshot.registry.remove(id)?;
                Ok((trigger, Persist::DeleteTrigger(id.clone())))
            })
            .await?;

        self.audit_change("smart_reply.trigger.removed", &[("trigger_id", trigger.id.to_string())]);
        Ok(trigger)
    }

    pub async fn add_response(&self, new: NewResponse) -> Result<Response, ApplicationError> {
        let response = self
            .commit(|snapshot| {
                let now = Utc::now();
                let response = Response {
                    id: snapshot.next_response_id(),
                    template: new.template,
                    format: new.format,
                    created_at: now,
                    updated_at: now,
                };
                snapshot.catalog.upsert(response.clone());
                Ok((response.clone(), Persist::SaveResponse(response)))
            })
            .await?;

        self.audit_change("smart_reply.response.added", &[("response_id", response.id.to_string())]);
        Ok(response)
    }

    pub async fn update_response(
        &self,
        id: &ResponseId,
        update: ResponseUpdate,
    ) -> Result<Response, ApplicationError> {
        let response = self
            .commit(|snapshot| {
                let mut response = snapshot.response(id)?.clone();
                response.template = update.template;
                if let Some(format) = update.format {
                    response.format = format;
                }
                response.updated_at = Utc::now();
                snapshot.catalog.upsert(response.clone());
                Ok((response.clone(), Persist::SaveResponse(response)))
            })
            .await?;

        self.audit_change("smart_reply.response.updated", &[("response_id", response.id.to_string())]);
        Ok(response)
    }

    /// Removes the response. Mappings that point at it become inert.
    pub async fn remove_response(&self, id: &ResponseId) -> Result<Response, ApplicationError> {
        let response = self
            .commit(|snapshot| {
                let response = snapshot.catalog.remove(id)?;
                Ok((response, Persist::DeleteResponse(id.clone())))
            })
            .await?;

        self.audit_change("smart_reply.response.removed", &[("response_id", response.id.to_string())]);
        Ok(response)
    }

    pub async fn set_mapping(
        &self,
        trigger_id: &TriggerId,
        response_id: &ResponseId,
    ) -> Result<Mapping, ApplicationError> {
        let mapping = self
            .commit(|snapshot| {
                snapshot.trigger(trigger_id)?;
                snapshot.response(response_id)?;
                let mapping = Mapping {
                    trigger_id: trigger_id.clone(),
                    response_id: response_id.clone(),
                    updated_at: Utc::now(),
                };
                snapshot.mappings.set(mapping.clone());
                Ok((mapping.clone(), Persist::SaveMapping(mapping)))
            })
            .await?;

        self.forget_dangling(trigger_id);
        self.audit_change(
            "smart_reply.mapping.set",
            &[
                ("trigger_id", mapping.trigger_id.to_string()),
                ("response_id", mapping.response_id.to_string()),
            ],
        );
        Ok(mapping)
    }

    pub async fn remove_mapping(&self, trigger_id: &TriggerId) -> Result<Mapping, ApplicationError> {
        let mapping = self
            .commit(|snapshot| {
                let mapping = snapshot.mappings.remove(trigger_id)?;
                Ok((mapping, Persist::DeleteMapping(trigger_id.clone())))
            })
            .await?;

        self.forget_dangling(trigger_id);
        self.audit_change(
            "smart_reply.mapping.removed",
            &[("trigger_id", mapping.trigger_id.to_string())],
        );
        Ok(mapping)
    }

    pub fn list_triggers(&self) -> Vec<Trigger> {
        self.snapshot().registry.triggers().cloned().collect()
    }

    pub fn list_responses(&self) -> Vec<Response> {
        self.snapshot().catalog.responses().cloned().collect()
    }

    pub fn list_mappings(&self) -> Vec<Mapping> {
        self.snapshot().mappings.mappings().cloned().collect()
    }

    pub fn consistency_report(&self) -> Vec<ConfigurationIssue> {
        let snapshot = self.snapshot();
        consistency_report(&snapshot.registry, &snapshot.catalog, &snapshot.mappings)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{EngineSettings, SmartReplyEngine};
    use crate::audit::{AuditCategory, InMemoryAuditSink};
    use crate::directory::InMemoryCustomerDirectory;
    use crate::domain::customer::CustomerRecord;
    use crate::domain::mapping::Mapping;
    use crate::domain::response::{NewResponse, ReplyFormat, Response, ResponseId, ResponseUpdate};
    use crate::domain::trigger::{MatchKind, NewTrigger, Trigger, TriggerId, TriggerUpdate};
    use crate::errors::{ApplicationError, DomainError};
    use crate::smart_reply::catalog::ConfigurationIssue;
    use crate::smart_reply::store::{InMemoryReplyStore, ReplyStore, StoreError, StoredConfiguration};

    async fn engine_with(
        store: Arc<dyn ReplyStore>,
        customers: Vec<CustomerRecord>,
    ) -> (SmartReplyEngine, InMemoryAuditSink) {
        let audit = InMemoryAuditSink::default();
        let engine = SmartReplyEngine::load(
            store,
            Arc::new(InMemoryCustomerDirectory::new(customers)),
            EngineSettings::default(),
        )
        .await
        .expect("engine loads")
        .with_audit_sink(Arc::new(audit.clone()));
        (engine, audit)
    }

    async fn engine() -> (SmartReplyEngine, InMemoryAuditSink) {
        engine_with(
            Arc::new(InMemoryReplyStore::default()),
            vec![CustomerRecord::new(1, "Maria")],
        )
        .await
    }

    async fn wire(
        engine: &SmartReplyEngine,
        trigger: NewTrigger,
        template: &str,
    ) -> (TriggerId, ResponseId) {
        let trigger = engine.add_trigger(trigger).await.expect("trigger");
        let response = engine.add_response(NewResponse::text(template)).await.expect("response");
        engine.set_mapping(&trigger.id, &response.id).await.expect("mapping");
        (trigger.id, response.id)
    }

    #[tokio::test]
    async fn greets_known_customer_by_name() {
        let (engine, _) = engine().await;
        wire(&engine, NewTrigger::new("γειά", MatchKind::Exact), "Hello {name}").await;

        assert_eq!(engine.handle_message(1, "γειά").await.as_deref(), Some("Hello Maria"));
    }

    #[tokio::test]
    async fn greets_unknown_customer_with_fallback() {
        let (engine, _) = engine().await;
        wire(&engine, NewTrigger::new("γειά", MatchKind::Exact), "Hello {name}").await;

        assert_eq!(engine.handle_message(2, "γειά").await.as_deref(), Some("Hello there"));
    }

    #[tokio::test]
    async fn contains_trigger_beats_regex_trigger() {
        let (engine, _) = engine().await;
        wire(&engine, NewTrigger::new("τιμή.*μετοχ", MatchKind::Regex), "regex reply").await;
        wire(&engine, NewTrigger::new("τιμή", MatchKind::Contains), "contains reply").await;

        assert_eq!(
            engine.handle_message(1, "ποια είναι η τιμή της μετοχής").await.as_deref(),
            Some("contains reply")
        );
    }

    #[tokio::test]
    async fn dangling_mapping_is_silent_and_warned_once() {
        let (engine, audit) = engine().await;
        let (_, response_id) =
            wire(&engine, NewTrigger::new("hello", MatchKind::Exact), "Hi {name}").await;
        engine.remove_response(&response_id).await.expect("remove response");

        for _ in 0..3 {
            assert_eq!(engine.handle_message(1, "hello").await, None);
        }

        assert_eq!(audit.events_of_type("smart_reply.mapping.dangling").len(), 1);
        assert_eq!(
            engine.consistency_report(),
            vec![ConfigurationIssue::DanglingResponse {
                trigger_id: TriggerId::from("TRG_001"),
                response_id,
            }]
        );
    }

    #[tokio::test]
    async fn remapping_a_stale_trigger_rearms_the_warning() {
        let (engine, audit) = engine().await;
        let (trigger_id, response_id) =
            wire(&engine, NewTrigger::new("hello", MatchKind::Exact), "Hi").await;
        engine.remove_response(&response_id).await.expect("remove");
        assert_eq!(engine.handle_message(1, "hello").await, None);

        let replacement = engine.add_response(NewResponse::text("Hi again")).await.expect("add");
        assert_ne!(replacement.id, response_id);
        engine.set_mapping(&trigger_id, &replacement.id).await.expect("remap");
        assert_eq!(engine.handle_message(1, "hello").await.as_deref(), Some("Hi again"));

        engine.remove_response(&replacement.id).await.expect("remove");
        assert_eq!(engine.handle_message(1, "hello").await, None);
        assert_eq!(audit.events_of_type("smart_reply.mapping.dangling").len(), 2);
    }

    #[tokio::test]
    async fn exact_trigger_beats_earlier_contains_and_regex() {
        let (engine, _) = engine().await;
        wire(&engine, NewTrigger::new("price", MatchKind::Contains), "contains").await;
        wire(&engine, NewTrigger::new("^price$", MatchKind::Regex), "regex").await;
        wire(&engine, NewTrigger::new("Price", MatchKind::Exact), "exact").await;

        assert_eq!(engine.handle_message(1, " PRICE ").await.as_deref(), Some("exact"));
    }

    #[tokio::test]
    async fn first_registered_contains_trigger_wins() {
        let (engine, _) = engine().await;
        wire(&engine, NewTrigger::new("order", MatchKind::Contains), "first").await;
        wire(&engine, NewTrigger::new("my order", MatchKind::Contains), "second").await;

        for _ in 0..5 {
            assert_eq!(
                engine.handle_message(1, "where is my order").await.as_deref(),
                Some("first")
            );
        }
    }

    #[tokio::test]
    async fn unmatched_and_unmapped_messages_return_none() {
        let (engine, _) = engine().await;
        assert_eq!(engine.handle_message(1, "anything").await, None);

        engine.add_trigger(NewTrigger::new("lonely", MatchKind::Exact)).await.expect("trigger");
        assert_eq!(engine.handle_message(1, "lonely").await, None);
    }

    #[tokio::test]
    async fn reply_reports_trigger_response_and_format() {
        let (engine, _) = engine().await;
        let trigger = engine
            .add_trigger(NewTrigger::new(r"how much is (.+)", MatchKind::Regex))
            .await
            .expect("trigger");
        let response = engine
            .add_response(NewResponse::markdown("*{regex_group_1}* is on its way, {first_name}"))
            .await
            .expect("response");
        engine.set_mapping(&trigger.id, &response.id).await.expect("mapping");

        let reply = engine.reply(1, "How much is gold").await.expect("reply");
        assert_eq!(reply.text, "*gold* is on its way, Maria");
        assert_eq!(reply.trigger_id, trigger.id);
        assert_eq!(reply.response_id, response.id);
        assert_eq!(reply.format, ReplyFormat::Markdown);
    }

    #[tokio::test]
    async fn invalid_patterns_are_rejected_and_not_persisted() {
        let store = Arc::new(InMemoryReplyStore::default());
        let (engine, _) = engine_with(store.clone(), Vec::new()).await;

        let error = engine
            .add_trigger(NewTrigger::new("(unclosed", MatchKind::Regex))
            .await
            .expect_err("malformed regex");
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvalidPattern { .. })));

        let error = engine
            .add_trigger(NewTrigger::new("  ", MatchKind::Exact))
            .await
            .expect_err("empty pattern");
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvalidPattern { .. })));

        assert!(engine.list_triggers().is_empty());
        assert!(store.snapshot().await.triggers.is_empty());
    }

    #[tokio::test]
    async fn update_keeps_position_and_rejects_bad_regex() {
        let (engine, _) = engine().await;
        let (first, _) = wire(&engine, NewTrigger::new("alpha", MatchKind::Contains), "first").await;
        wire(&engine, NewTrigger::new("beta", MatchKind::Contains), "second").await;

        let original = engine.list_triggers()[0].clone();
        let updated = engine
            .update_trigger(
                &first,
                TriggerUpdate {
                    pattern: "beta".to_owned(),
                    match_kind: MatchKind::Contains,
                    intent: Some("greeting".to_owned()),
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.sequence, original.sequence);
        assert_eq!(updated.created_at, original.created_at);
        assert_eq!(engine.handle_message(1, "beta").await.as_deref(), Some("first"));

        let error = engine
            .update_trigger(
                &first,
                TriggerUpdate {
                    pattern: "[".to_owned(),
                    match_kind: MatchKind::Regex,
                    intent: None,
                },
            )
            .await
            .expect_err("bad regex");
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvalidPattern { .. })));
        assert_eq!(engine.list_triggers()[0].pattern, "beta");
    }

    #[tokio::test]
    async fn deactivate_and_activate_toggle_matching() {
        let (engine, _) = engine().await;
        let (trigger_id, _) = wire(&engine, NewTrigger::new("hi", MatchKind::Exact), "hey").await;

        assert!(!engine.deactivate_trigger(&trigger_id).await.expect("deactivate").active);
        assert_eq!(engine.handle_message(1, "hi").await, None);

        assert!(engine.activate_trigger(&trigger_id).await.expect("activate").active);
        assert_eq!(engine.handle_message(1, "hi").await.as_deref(), Some("hey"));
    }

    #[tokio::test]
    async fn remove_trigger_leaves_mapping_for_the_report() {
        let (engine, _) = engine().await;
        let (trigger_id, response_id) =
            wire(&engine, NewTrigger::new("hi", MatchKind::Exact), "hey").await;

        engine.remove_trigger(&trigger_id).await.expect("remove");
        assert_eq!(engine.handle_message(1, "hi").await, None);
        assert_eq!(
            engine.consistency_report(),
            vec![ConfigurationIssue::MissingTrigger { trigger_id: trigger_id.clone(), response_id }]
        );

        let next = engine.add_trigger(NewTrigger::new("hello", MatchKind::Exact)).await.expect("add");
        assert_ne!(next.id, trigger_id, "ids referenced by mappings are never reused");
    }

    #[tokio::test]
    async fn set_mapping_requires_existing_ids_and_is_last_write_wins() {
        let (engine, _) = engine().await;
        let (trigger_id, _) = wire(&engine, NewTrigger::new("hi", MatchKind::Exact), "one").await;
        let second = engine.add_response(NewResponse::text("two")).await.expect("response");

        engine.set_mapping(&trigger_id, &second.id).await.expect("remap");
        assert_eq!(engine.handle_message(1, "hi").await.as_deref(), Some("two"));
        assert_eq!(engine.list_mappings().len(), 1);

        let error = engine
            .set_mapping(&TriggerId::from("TRG_404"), &second.id)
            .await
            .expect_err("unknown trigger");
        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::UnknownTrigger(TriggerId::from("TRG_404")))
        );
        let error = engine
            .set_mapping(&trigger_id, &ResponseId::from("RES_404"))
            .await
            .expect_err("unknown response");
        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::UnknownResponse(ResponseId::from("RES_404")))
        );

        engine.remove_mapping(&trigger_id).await.expect("unmap");
        assert_eq!(engine.handle_message(1, "hi").await, None);
        assert!(engine.remove_mapping(&trigger_id).await.is_err());
    }

    #[tokio::test]
    async fn update_response_changes_rendered_text() {
        let (engine, _) = engine().await;
        let (_, response_id) = wire(&engine, NewTrigger::new("hi", MatchKind::Exact), "old").await;

        let updated = engine
            .update_response(
                &response_id,
                ResponseUpdate { template: "new {name}".to_owned(), format: None },
            )
            .await
            .expect("update");
        assert_eq!(updated.format, ReplyFormat::Text);
        assert_eq!(engine.handle_message(1, "hi").await.as_deref(), Some("new Maria"));
        assert_eq!(engine.list_responses().len(), 1);
    }

    #[tokio::test]
    async fn mutations_are_written_through_and_reload_identically() {
        let store = Arc::new(InMemoryReplyStore::default());
        let (engine, _) = engine_with(store.clone(), vec![CustomerRecord::new(1, "Maria")]).await;
        wire(&engine, NewTrigger::new("γειά", MatchKind::Exact), "Hello {name}").await;
        wire(&engine, NewTrigger::new("τιμή", MatchKind::Contains), "Price list").await;

        let persisted = store.snapshot().await;
        assert_eq!(persisted.triggers.len(), 2);
        assert_eq!(persisted.responses.len(), 2);
        assert_eq!(persisted.mappings.len(), 2);

        let (reloaded, _) = engine_with(store, vec![CustomerRecord::new(1, "Maria")]).await;
        assert_eq!(reloaded.list_triggers(), engine.list_triggers());
        assert_eq!(reloaded.handle_message(1, "γειά").await.as_deref(), Some("Hello Maria"));
    }

    fn stored_trigger(id: &str, sequence: u64, kind: MatchKind, pattern: &str) -> Trigger {
        let now = chrono::Utc::now();
        Trigger {
            id: TriggerId::from(id),
            pattern: pattern.to_owned(),
            match_kind: kind,
            intent: None,
            active: true,
            sequence,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn uncompilable_stored_trigger_keeps_its_id_and_row() {
        let store = Arc::new(InMemoryReplyStore::new(StoredConfiguration {
            triggers: vec![
                stored_trigger("TRG_001", 1, MatchKind::Exact, "hello"),
                stored_trigger("TRG_002", 2, MatchKind::Regex, r"\w{20}"),
            ],
            responses: Vec::new(),
            mappings: Vec::new(),
        }));
        let wide = TriggerId::from("TRG_002");

        let engine = SmartReplyEngine::load(
            store.clone(),
            Arc::new(InMemoryCustomerDirectory::default()),
            EngineSettings { regex_size_limit: 64, ..EngineSettings::default() },
        )
        .await
        .expect("engine loads");

        let listed: Vec<TriggerId> = engine.list_triggers().into_iter().map(|t| t.id).collect();
        assert_eq!(listed, vec![TriggerId::from("TRG_001"), wide.clone()]);
        assert!(engine.consistency_report().iter().any(|issue| matches!(
            issue,
            ConfigurationIssue::UncompilableTrigger { trigger_id, .. } if trigger_id == &wide
        )));
        assert_eq!(engine.handle_message(1, &"a".repeat(20)).await, None);

        let added = engine.add_trigger(NewTrigger::new("bye", MatchKind::Exact)).await.expect("bye");
        assert_eq!(added.id, TriggerId::from("TRG_003"));
        assert_eq!(added.sequence, 3);
        let stored = store.snapshot().await.triggers;
        assert!(stored.iter().any(|t| t.id == wide && t.pattern == r"\w{20}"));

        engine.remove_trigger(&wide).await.expect("inert trigger is removable");
        assert!(store.snapshot().await.triggers.iter().all(|t| t.id != wide));
    }

    #[tokio::test]
    async fn markdown_replies_escape_substituted_text() {
        let (engine, _) = engine().await;
        let trigger = engine
            .add_trigger(NewTrigger::new(r"how much is (.+)", MatchKind::Regex))
            .await
            .expect("trigger");
        let response =
            engine.add_response(NewResponse::markdown("*{regex_group_1}*")).await.expect("response");
        engine.set_mapping(&trigger.id, &response.id).await.expect("mapping");

        assert_eq!(
            engine.handle_message(1, "how much is snake_case *stock").await.as_deref(),
            Some(r"*snake\_case \*stock*")
        );
    }

    struct FailingStore {
        fail_writes: AtomicBool,
        inner: InMemoryReplyStore,
    }

    impl FailingStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(StoreError("disk full".to_owned()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ReplyStore for FailingStore {
        async fn load(&self) -> Result<StoredConfiguration, StoreError> {
            self.inner.load().await
        }
        async fn save_trigger(&self, trigger: &Trigger) -> Result<(), StoreError> {
            self.check()?;
            self.inner.save_trigger(trigger).await
        }
        async fn delete_trigger(&self, id: &TriggerId) -> Result<(), StoreError> {
            self.check()?;
            self.inner.delete_trigger(id).await
        }
        async fn save_response(&self, response: &Response) -> Result<(), StoreError> {
            self.check()?;
            self.inner.save_response(response).await
        }
        async fn delete_response(&self, id: &ResponseId) -> Result<(), StoreError> {
            self.check()?;
            self.inner.delete_response(id).await
        }
        async fn save_mapping(&self, mapping: &Mapping) -> Result<(), StoreError> {
            self.check()?;
            self.inner.save_mapping(mapping).await
        }
        async fn delete_mapping(&self, trigger_id: &TriggerId) -> Result<(), StoreError> {
            self.check()?;
            self.inner.delete_mapping(trigger_id).await
        }
    }

    #[tokio::test]
    async fn failed_persistence_leaves_snapshot_untouched() {
        let store = Arc::new(FailingStore {
            fail_writes: AtomicBool::new(false),
            inner: InMemoryReplyStore::default(),
        });
        let (engine, audit) = engine_with(store.clone(), Vec::new()).await;
        let (trigger_id, _) = wire(&engine, NewTrigger::new("hi", MatchKind::Exact), "hey").await;

        store.fail_writes.store(true, Ordering::SeqCst);
        let error = engine.deactivate_trigger(&trigger_id).await.expect_err("store down");
        assert!(matches!(error, ApplicationError::Persistence(_)));
        let failures = audit.events_of_type("smart_reply.persist.failed");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].category, AuditCategory::Persistence);
        assert_eq!(failures[0].metadata.get("operation").map(String::as_str), Some("save_trigger"));
        assert!(engine.add_trigger(NewTrigger::new("new", MatchKind::Exact)).await.is_err());

        assert_eq!(engine.handle_message(1, "hi").await.as_deref(), Some("hey"));
        assert_eq!(engine.list_triggers().len(), 1);
    }

    #[tokio::test]
    async fn startup_report_marks_dangling_mappings_as_reported() {
        let (seed, _) = engine().await;
        let (_, response_id) = wire(&seed, NewTrigger::new("hi", MatchKind::Exact), "hey").await;
        seed.remove_response(&response_id).await.expect("remove");
        let stored = StoredConfiguration {
            triggers: seed.list_triggers(),
            responses: seed.list_responses(),
            mappings: seed.list_mappings(),
        };

        let (engine, audit) =
            engine_with(Arc::new(InMemoryReplyStore::new(stored)), Vec::new()).await;
        assert_eq!(engine.report_startup_issues().len(), 1);
        assert_eq!(engine.handle_message(1, "hi").await, None);
        assert_eq!(audit.events_of_type("smart_reply.mapping.dangling").len(), 1);
    }

    #[tokio::test]
    async fn readers_never_observe_partial_updates() {
        let (engine, _) = engine().await;
        let (trigger_id, response_id) =
            wire(&engine, NewTrigger::new("status", MatchKind::Exact), "v0").await;
        let engine = Arc::new(engine);

        let reader = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                for _ in 0..200 {
                    let reply = engine.handle_message(1, "status").await;
                    let reply = reply.expect("trigger stays mapped");
                    assert!(reply.starts_with('v'));
                    tokio::task::yield_now().await;
                }
            })
        };

        for version in 1..50 {
            engine
                .update_response(
                    &response_id,
                    ResponseUpdate { template: format!("v{version}"), format: None },
                )
                .await
                .expect("update");
        }
        reader.await.expect("reader task");
        assert_eq!(engine.handle_message(1, "status").await.as_deref(), Some("v49"));
        assert_eq!(engine.snapshot().registry.get(&trigger_id).map(|t| t.active), Some(true));
    }
}
