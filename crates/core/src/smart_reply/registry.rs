use chrono::Utc;
use tracing::warn;

use crate::domain::trigger::{MatchKind, Trigger, TriggerId};
use crate::errors::DomainError;
use crate::smart_reply::pattern::{CompiledMatcher, MatchCaptures, MessageText, PatternCompiler};

#[derive(Clone, Debug)]
enum TriggerMatcher {
    Compiled(CompiledMatcher),
    /// Stored pattern that no longer compiles. Kept so the trigger stays
    /// listable and removable and its id is never handed out again.
    Inert { reason: String },
}

#[derive(Clone, Debug)]
pub struct RegisteredTrigger {
    pub trigger: Trigger,
    matcher: TriggerMatcher,
}

impl RegisteredTrigger {
    pub fn compile(trigger: Trigger, compiler: &PatternCompiler) -> Result<Self, DomainError> {
        let matcher = compiler
            .compile(&trigger.pattern, trigger.match_kind)
            .map_err(|error| DomainError::invalid_pattern(&trigger.pattern, error))?;
        Ok(Self { trigger, matcher: TriggerMatcher::Compiled(matcher) })
    }

    /// Compiles a persisted trigger, keeping it as an inert entry when its
    /// pattern is rejected.
    pub fn restore(trigger: Trigger, compiler: &PatternCompiler) -> Self {
        match compiler.compile(&trigger.pattern, trigger.match_kind) {
            Ok(matcher) => Self { trigger, matcher: TriggerMatcher::Compiled(matcher) },
            Err(error) => {
                warn!(
                    event_name = "smart_reply.trigger.uncompilable",
                    trigger_id = %trigger.id,
                    reason = %error.reason,
                    "stored trigger failed to compile; kept inert"
                );
                Self { trigger, matcher: TriggerMatcher::Inert { reason: error.reason } }
            }
        }
    }

    /// Why the stored pattern cannot be matched, if it cannot.
    pub fn compile_failure(&self) -> Option<&str> {
        match &self.matcher {
            TriggerMatcher::Compiled(_) => None,
            TriggerMatcher::Inert { reason } => Some(reason.as_str()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerMatch {
    pub trigger_id: TriggerId,
    pub match_kind: MatchKind,
    pub captures: MatchCaptures,
}

/// Triggers kept in insertion order together with their compiled matchers.
#[derive(Clone, Debug, Default)]
pub struct TriggerRegistry {
    entries: Vec<RegisteredTrigger>,
}

impl TriggerRegistry {
    /// Builds a registry from persisted triggers. A stored pattern that no
    /// longer compiles stays registered but never matches.
    pub fn from_triggers(
        triggers: impl IntoIterator<Item = Trigger>,
        compiler: &PatternCompiler,
    ) -> Self {
        let mut entries: Vec<RegisteredTrigger> = triggers
            .into_iter()
            .map(|trigger| RegisteredTrigger::restore(trigger, compiler))
            .collect();
        entries.sort_by_key(|entry| entry.trigger.sequence);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &TriggerId) -> Option<&Trigger> {
        self.entries.iter().map(|entry| &entry.trigger).find(|trigger| &trigger.id == id)
    }

    pub fn contains(&self, id: &TriggerId) -> bool {
        self.get(id).is_some()
    }

    pub fn triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.entries.iter().map(|entry| &entry.trigger)
    }

    /// Triggers kept inert because their stored pattern does not compile.
    pub fn uncompilable(&self) -> impl Iterator<Item = (&Trigger, &str)> {
        self.entries
            .iter()
            .filter_map(|entry| entry.compile_failure().map(|reason| (&entry.trigger, reason)))
    }

    pub fn next_sequence(&self) -> u64 {
        self.entries.iter().map(|entry| entry.trigger.sequence).max().map_or(1, |max| max + 1)
    }

    pub fn insert(&mut self, entry: RegisteredTrigger) -> Result<(), DomainError> {
        if self.contains(&entry.trigger.id) {
            return Err(DomainError::InvariantViolation(format!(
                "trigger `{}` already exists",
                entry.trigger.id
            )));
        }
        let position = self
            .entries
            .iter()
            .position(|existing| existing.trigger.sequence > entry.trigger.sequence)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, entry);
        Ok(())
    }

    /// Swaps in a recompiled trigger at the slot of the one it replaces.
    pub fn replace(&mut self, entry: RegisteredTrigger) -> Result<(), DomainError> {
        let slot = self.slot_mut(&entry.trigger.id)?;
        *slot = entry;
        Ok(())
    }

    pub fn set_active(&mut self, id: &TriggerId, active: bool) -> Result<&Trigger, DomainError> {
        let slot = self.slot_mut(id)?;
        slot.trigger.active = active;
        slot.trigger.updated_at = Utc::now();
        Ok(&slot.trigger)
    }

    pub fn remove(&mut self, id: &TriggerId) -> Result<Trigger, DomainError> {
        let position = self
            .entries
            .iter()
            .position(|entry| &entry.trigger.id == id)
            .ok_or_else(|| DomainError::UnknownTrigger(id.clone()))?;
        Ok(self.entries.remove(position).trigger)
    }

    pub fn find_match(&self, text: &str) -> Option<TriggerId> {
        self.find(text).map(|found| found.trigger_id)
    }

    /// Scans active triggers tier by tier; within a tier the earliest
    /// registered trigger wins.
    pub fn find(&self, text: &str) -> Option<TriggerMatch> {
        let message = MessageText::new(text);
        MatchKind::PRECEDENCE.into_iter().find_map(|kind| {
            self.entries
                .iter()
                .filter(|entry| entry.trigger.active && entry.trigger.match_kind == kind)
                .find_map(|entry| {
                    let TriggerMatcher::Compiled(matcher) = &entry.matcher else {
                        return None;
                    };
                    matcher.matches(&message).map(|captures| TriggerMatch {
                        trigger_id: entry.trigger.id.clone(),
                        match_kind: kind,
                        captures,
                    })
                })
        })
    }

    fn slot_mut(&mut self, id: &TriggerId) -> Result<&mut RegisteredTrigger, DomainError> {
        self.entries
            .iter_mut()
            .find(|entry| &entry.trigger.id == id)
            .ok_or_else(|| DomainError::UnknownTrigger(id.clone()))
    }
}
