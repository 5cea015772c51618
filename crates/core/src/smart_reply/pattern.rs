//! Pattern compiler: turns a trigger definition into an immutable matcher.
//!
//! Exact and contains patterns compare against normalized text (trimmed,
//! Unicode lowercase). Regex patterns are compiled once, case-insensitive,
//! and searched in the raw message.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::domain::trigger::MatchKind;

pub const DEFAULT_REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct CompileError {
    pub reason: String,
}

impl CompileError {
    fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Inbound text prepared once per message so every matcher shares the same
/// normalized form.
#[derive(Clone, Debug)]
pub struct MessageText<'a> {
    raw: &'a str,
    normalized: String,
}

impl<'a> MessageText<'a> {
    pub fn new(raw: &'a str) -> Self {
        Self { raw, normalized: normalize(raw) }
    }

    pub fn raw(&self) -> &str {
        self.raw
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }
}

/// Regex capture groups of a successful match, 1-based like `{regex_group_1}`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchCaptures {
    groups: Vec<Option<String>>,
}

impl MatchCaptures {
    pub fn group(&self, index: usize) -> Option<&str> {
        index.checked_sub(1).and_then(|slot| self.groups.get(slot)).and_then(Option::as_deref)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[derive(Clone, Debug)]
enum Matcher {
    Exact(String),
    Contains(String),
    Regex(Regex),
}

#[derive(Clone, Debug)]
pub struct CompiledMatcher {
    matcher: Matcher,
}

impl CompiledMatcher {
    pub fn kind(&self) -> MatchKind {
        match self.matcher {
            Matcher::Exact(_) => MatchKind::Exact,
            Matcher::Contains(_) => MatchKind::Contains,
            Matcher::Regex(_) => MatchKind::Regex,
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.matches(&MessageText::new(text)).is_some()
    }

    pub fn matches(&self, text: &MessageText<'_>) -> Option<MatchCaptures> {
        match &self.matcher {
            Matcher::Exact(pattern) => {
                (text.normalized() == pattern).then(MatchCaptures::default)
            }
            Matcher::Contains(pattern) => {
                text.normalized().contains(pattern.as_str()).then(MatchCaptures::default)
            }
            Matcher::Regex(regex) => regex.captures(text.raw()).map(|captures| MatchCaptures {
                groups: captures
                    .iter()
                    .skip(1)
                    .map(|group| group.map(|value| value.as_str().to_owned()))
                    .collect(),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatternCompiler {
    regex_size_limit: usize,
}

impl Default for PatternCompiler {
    fn default() -> Self {
        Self { regex_size_limit: DEFAULT_REGEX_SIZE_LIMIT }
    }
}

impl PatternCompiler {
    pub fn new(regex_size_limit: usize) -> Self {
        Self { regex_size_limit }
    }

    pub fn compile(&self, pattern: &str, kind: MatchKind) -> Result<CompiledMatcher, CompileError> {
        if pattern.trim().is_empty() {
            return Err(CompileError::new("pattern must not be empty"));
        }

        let matcher = match kind {
            MatchKind::Exact => Matcher::Exact(normalize(pattern)),
            MatchKind::Contains => Matcher::Contains(normalize(pattern)),
            MatchKind::Regex => Matcher::Regex(
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .size_limit(self.regex_size_limit)
                    .build()
                    .map_err(|error| CompileError::new(error.to_string()))?,
            ),
        };

        Ok(CompiledMatcher { matcher })
    }
}

pub fn compile(pattern: &str, kind: MatchKind) -> Result<CompiledMatcher, CompileError> {
    PatternCompiler::default().compile(pattern, kind)
}
