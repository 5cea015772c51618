use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerId(pub String);

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TriggerId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// How a trigger pattern is compared against inbound text.
///
/// Declaration order is also match precedence: when several active triggers
/// could fire for the same message, `Exact` beats `Contains` beats `Regex`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Contains,
    Regex,
}

impl MatchKind {
    pub const PRECEDENCE: [MatchKind; 3] = [MatchKind::Exact, MatchKind::Contains, MatchKind::Regex];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Contains => "contains",
            Self::Regex => "regex",
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "contains" => Ok(Self::Contains),
            "regex" => Ok(Self::Regex),
            other => Err(DomainError::UnsupportedMatchKind(other.to_owned())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub pattern: String,
    pub match_kind: MatchKind,
    pub intent: Option<String>,
    pub active: bool,
    /// Insertion order. Breaks ties between triggers of the same kind.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTrigger {
    pub pattern: String,
    pub match_kind: MatchKind,
    pub intent: Option<String>,
    pub active: bool,
}

impl NewTrigger {
    pub fn new(pattern: impl Into<String>, match_kind: MatchKind) -> Self {
        Self { pattern: pattern.into(), match_kind, intent: None, active: true }
    }

    pub fn intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerUpdate {
    pub pattern: String,
    pub match_kind: MatchKind,
    pub intent: Option<String>,
}
