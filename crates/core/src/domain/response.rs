use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResponseId(pub String);

impl fmt::Display for ResponseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResponseId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFormat {
    #[default]
    Text,
    Markdown,
}

impl ReplyFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
        }
    }
}

impl FromStr for ReplyFormat {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "markdown" => Ok(Self::Markdown),
            other => Err(DomainError::InvariantViolation(format!(
                "unsupported reply format `{other}` (expected text|markdown)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: ResponseId,
    pub template: String,
    pub format: ReplyFormat,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewResponse {
    pub template: String,
    pub format: ReplyFormat,
}

impl NewResponse {
    pub fn text(template: impl Into<String>) -> Self {
        Self { template: template.into(), format: ReplyFormat::Text }
    }

    pub fn markdown(template: impl Into<String>) -> Self {
        Self { template: template.into(), format: ReplyFormat::Markdown }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseUpdate {
    pub template: String,
    pub format: Option<ReplyFormat>,
}
