use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::mapping::Mapping;
use crate::domain::response::{Response, ResponseId};
use crate::domain::trigger::TriggerId;
use crate::errors::DomainError;
use crate::smart_reply::personalizer::unknown_placeholders;
use crate::smart_reply::registry::TriggerRegistry;

#[derive(Clone, Debug, Default)]
pub struct ResponseCatalog {
    responses: BTreeMap<ResponseId, Response>,
}

impl ResponseCatalog {
    pub fn from_responses(responses: impl IntoIterator<Item = Response>) -> Self {
        Self {
            responses: responses.into_iter().map(|response| (response.id.clone(), response)).collect(),
        }
    }

    pub fn get(&self, id: &ResponseId) -> Option<&Response> {
        self.responses.get(id)
    }

    pub fn contains(&self, id: &ResponseId) -> bool {
        self.responses.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn responses(&self) -> impl Iterator<Item = &Response> {
        self.responses.values()
    }

    pub fn upsert(&mut self, response: Response) {
        self.responses.insert(response.id.clone(), response);
    }

    pub fn remove(&mut self, id: &ResponseId) -> Result<Response, DomainError> {
        self.responses.remove(id).ok_or_else(|| DomainError::UnknownResponse(id.clone()))
    }
}

#[derive(Clone, Debug, Default)]
pub struct MappingTable {
    mappings: BTreeMap<TriggerId, Mapping>,
}

impl MappingTable {
    pub fn from_mappings(mappings: impl IntoIterator<Item = Mapping>) -> Self {
        Self {
            mappings: mappings.into_iter().map(|mapping| (mapping.trigger_id.clone(), mapping)).collect(),
        }
    }

    pub fn get(&self, trigger_id: &TriggerId) -> Option<&Mapping> {
        self.mappings.get(trigger_id)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.values()
    }

    /// Last write wins: a trigger maps to at most one response.
    pub fn set(&mut self, mapping: Mapping) -> Option<Mapping> {
        self.mappings.insert(mapping.trigger_id.clone(), mapping)
    }

    pub fn remove(&mut self, trigger_id: &TriggerId) -> Result<Mapping, DomainError> {
        self.mappings.remove(trigger_id).ok_or_else(|| DomainError::UnknownMapping(trigger_id.clone()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution<'a> {
    Resolved(&'a Response),
    Unmapped,
    Dangling { response_id: ResponseId },
}

impl<'a> Resolution<'a> {
    pub fn response(&self) -> Option<&'a Response> {
        match self {
            Self::Resolved(response) => Some(response),
            Self::Unmapped | Self::Dangling { .. } => None,
        }
    }
}

pub fn resolve<'a>(
    trigger_id: &TriggerId,
    mappings: &MappingTable,
    catalog: &'a ResponseCatalog,
) -> Resolution<'a> {
    let Some(mapping) = mappings.get(trigger_id) else {
        return Resolution::Unmapped;
    };
    match catalog.get(&mapping.response_id) {
        Some(response) => Resolution::Resolved(response),
        None => Resolution::Dangling { response_id: mapping.response_id.clone() },
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigurationIssue {
    DanglingResponse { trigger_id: TriggerId, response_id: ResponseId },
    MissingTrigger { trigger_id: TriggerId, response_id: ResponseId },
    UncompilableTrigger { trigger_id: TriggerId, reason: String },
    UnmappedTrigger { trigger_id: TriggerId },
    UnknownPlaceholder { response_id: ResponseId, placeholder: String },
}

impl fmt::Display for ConfigurationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingResponse { trigger_id, response_id } => {
                write!(f, "mapping {trigger_id} -> {response_id} points at a missing response")
            }
            Self::MissingTrigger { trigger_id, response_id } => {
                write!(f, "mapping {trigger_id} -> {response_id} points at a missing trigger")
            }
            Self::UncompilableTrigger { trigger_id, reason } => {
                write!(f, "trigger {trigger_id} has a pattern that does not compile: {reason}")
            }
            Self::UnmappedTrigger { trigger_id } => {
                write!(f, "active trigger {trigger_id} has no response mapped")
            }
            Self::UnknownPlaceholder { response_id, placeholder } => {
                write!(f, "response {response_id} uses unknown placeholder {{{placeholder}}}")
            }
        }
    }
}

/// Everything an administrator should fix, in a stable order: mapping
/// problems first, then trigger problems, then template problems.
pub fn consistency_report(
    registry: &TriggerRegistry,
    catalog: &ResponseCatalog,
    mappings: &MappingTable,
) -> Vec<ConfigurationIssue> {
    let mut issues = Vec::new();

    for mapping in mappings.mappings() {
        if !registry.contains(&mapping.trigger_id) {
            issues.push(ConfigurationIssue::MissingTrigger {
                trigger_id: mapping.trigger_id.clone(),
                response_id: mapping.response_id.clone(),
            });
        }
        if !catalog.contains(&mapping.response_id) {
            issues.push(ConfigurationIssue::DanglingResponse {
                trigger_id: mapping.trigger_id.clone(),
                response_id: mapping.response_id.clone(),
            });
        }
    }

    issues.extend(registry.uncompilable().map(|(trigger, reason)| {
        ConfigurationIssue::UncompilableTrigger {
            trigger_id: trigger.id.clone(),
            reason: reason.to_owned(),
        }
    }));

    issues.extend(
        registry
            .triggers()
            .filter(|trigger| trigger.active && mappings.get(&trigger.id).is_none())
            .map(|trigger| ConfigurationIssue::UnmappedTrigger { trigger_id: trigger.id.clone() }),
    );

    for response in catalog.responses() {
        issues.extend(unknown_placeholders(&response.template).into_iter().map(|placeholder| {
            ConfigurationIssue::UnknownPlaceholder { response_id: response.id.clone(), placeholder }
        }));
    }

    issues
}
