//! `{field}` placeholder substitution for reply templates.
//!
//! Rendering is total: unknown names are copied verbatim, `{}` and unbalanced
//! braces stay literal, and missing customer data falls back to configured
//! literals.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::directory::{lookup_with_timeout, CustomerDirectory};
use crate::domain::customer::CustomerRecord;
use crate::domain::response::ReplyFormat;
use crate::errors::DomainError;
use crate::smart_reply::pattern::MatchCaptures;

const CRM_PREFIX: &str = "crm_";
const REGEX_GROUP_PREFIX: &str = "regex_group_";
const MARKDOWN_SPECIAL: &[char] = &['_', '*', '`', '['];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlaceholderField {
    Name,
    FirstName,
    Email,
    Status,
    Notes,
    Projects,
    UserId,
}

impl PlaceholderField {
    pub const ALL: [PlaceholderField; 7] = [
        Self::Name,
        Self::FirstName,
        Self::Email,
        Self::Status,
        Self::Notes,
        Self::Projects,
        Self::UserId,
    ];

    /// Accepts the bare field name or its `crm_` alias, ignoring case and
    /// surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let key = normalized.strip_prefix(CRM_PREFIX).unwrap_or(&normalized);
        Self::ALL.into_iter().find(|field| field.key() == key)
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::FirstName => "first_name",
            Self::Email => "email",
            Self::Status => "status",
            Self::Notes => "notes",
            Self::Projects => "projects",
            Self::UserId => "user_id",
        }
    }

    pub fn value_from(&self, record: &CustomerRecord) -> String {
        match self {
            Self::Name => record.name.trim().to_owned(),
            Self::FirstName => record.name.split_whitespace().next().unwrap_or_default().to_owned(),
            Self::Email => record.email.trim().to_owned(),
            Self::Status => record.status.label().trim().to_owned(),
            Self::Notes => record
                .notes
                .iter()
                .map(|note| note.trim())
                .filter(|note| !note.is_empty())
                .collect::<Vec<_>>()
                .join("; "),
            Self::Projects => {
                record.project_tags.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
            }
            Self::UserId => record.user_id.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placeholder {
    Field(PlaceholderField),
    RegexGroup(usize),
}

impl Placeholder {
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(field) = PlaceholderField::parse(raw) {
            return Some(Self::Field(field));
        }
        raw.trim()
            .to_ascii_lowercase()
            .strip_prefix(REGEX_GROUP_PREFIX)
            .and_then(|index| index.parse::<usize>().ok())
            .filter(|index| *index > 0)
            .map(Self::RegexGroup)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Token { raw: &'a str, name: &'a str },
}

/// Splits a template into literal runs and `{name}` tokens. A `{` that is
/// followed by another `{` before any `}` is literal.
fn segments(template: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let after_open = &rest[open + 1..];
        match after_open.find(['{', '}']) {
            Some(close) if after_open[close..].starts_with('}') => {
                if open > 0 {
                    segments.push(Segment::Literal(&rest[..open]));
                }
                let end = open + 1 + close + 1;
                segments.push(Segment::Token { raw: &rest[open..end], name: &after_open[..close] });
                rest = &rest[end..];
            }
            _ => {
                segments.push(Segment::Literal(&rest[..=open]));
                rest = after_open;
            }
        }
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    segments
}

/// Names of well-formed `{...}` tokens that do not resolve to a placeholder.
pub fn unknown_placeholders(template: &str) -> Vec<String> {
    segments(template)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Token { name, .. } if !name.is_empty() && Placeholder::parse(name).is_none() => {
                Some(name.to_owned())
            }
            _ => None,
        })
        .collect()
}

pub fn references_customer_fields(template: &str) -> bool {
    segments(template).into_iter().any(|segment| {
        matches!(
            segment,
            Segment::Token { name, .. } if matches!(Placeholder::parse(name), Some(Placeholder::Field(_)))
        )
    })
}

/// Literal used when a field has no value or the customer is unknown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackLiterals {
    values: BTreeMap<PlaceholderField, String>,
}

impl Default for FallbackLiterals {
    fn default() -> Self {
        Self { values: BTreeMap::from([(PlaceholderField::Name, "there".to_owned())]) }
    }
}

impl FallbackLiterals {
    /// Defaults overlaid with configured literals keyed by field name.
    pub fn from_config(overrides: &BTreeMap<String, String>) -> Result<Self, DomainError> {
        let mut fallbacks = Self::default();
        for (key, value) in overrides {
            let field = PlaceholderField::parse(key).ok_or_else(|| {
                DomainError::InvariantViolation(format!("unknown placeholder field `{key}`"))
            })?;
            fallbacks.values.insert(field, value.clone());
        }
        Ok(fallbacks)
    }

    pub fn get(&self, field: PlaceholderField) -> &str {
        self.values.get(&field).map(String::as_str).unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Personalizer {
    fallbacks: FallbackLiterals,
}

impl Personalizer {
    pub fn new(fallbacks: FallbackLiterals) -> Self {
        Self { fallbacks }
    }

    pub fn fallbacks(&self) -> &FallbackLiterals {
        &self.fallbacks
    }

    pub fn render_with(
        &self,
        template: &str,
        record: Option<&CustomerRecord>,
        captures: Option<&MatchCaptures>,
    ) -> String {
        self.render_as(template, ReplyFormat::Text, record, captures)
    }

    /// Like `render_with`, but substituted values are escaped for `format`.
    /// Template text itself is copied unchanged.
    pub fn render_as(
        &self,
        template: &str,
        format: ReplyFormat,
        record: Option<&CustomerRecord>,
        captures: Option<&MatchCaptures>,
    ) -> String {
        let mut rendered = String::with_capacity(template.len());
        for segment in segments(template) {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Token { raw, name } => match Placeholder::parse(name) {
                    Some(Placeholder::Field(field)) => {
                        let value = record.map(|record| field.value_from(record)).unwrap_or_default();
                        if value.is_empty() {
                            push_value(&mut rendered, self.fallbacks.get(field), format);
                        } else {
                            push_value(&mut rendered, &value, format);
                        }
                    }
                    Some(Placeholder::RegexGroup(index)) => push_value(
                        &mut rendered,
                        captures.and_then(|captures| captures.group(index)).unwrap_or_default(),
                        format,
                    ),
                    None => rendered.push_str(raw),
                },
            }
        }
        rendered
    }

    /// Renders `template` for `user_id`, fetching the customer at most once
    /// and only when the template references a customer field.
    pub async fn render(
        &self,
        template: &str,
        user_id: i64,
        directory: &dyn CustomerDirectory,
        timeout: Duration,
        format: ReplyFormat,
        captures: Option<&MatchCaptures>,
    ) -> String {
        let record = if references_customer_fields(template) {
            lookup_with_timeout(directory, user_id, timeout).await
        } else {
            None
        };
        self.render_as(template, format, record.as_ref(), captures)
    }
}

// Telegram's legacy Markdown rejects a message with an unbalanced entity
// marker, so customer text and captures are escaped.
fn push_value(rendered: &mut String, value: &str, format: ReplyFormat) {
    match format {
        ReplyFormat::Text => rendered.push_str(value),
        ReplyFormat::Markdown => {
            for ch in value.chars() {
                if MARKDOWN_SPECIAL.contains(&ch) {
                    rendered.push('\\');
                }
                rendered.push(ch);
            }
        }
    }
}
