// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus subjects and subscription patterns
//!
//! Subjects are dot-separated hierarchical addresses (`relay.agent.sess-1`).
//! Patterns add two wildcards: `*` matches exactly one segment, `>` matches
//! one or more trailing segments. `>` is only legal as the final segment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubjectError {
    #[error("subject is empty")]
    Empty,
    #[error("subject {0:?} has an empty segment")]
    EmptySegment(String),
    #[error("subject {0:?} contains a wildcard; wildcards are only valid in patterns")]
    WildcardInSubject(String),
    #[error("pattern {0:?} uses '>' before the final segment")]
    TailWildcardNotLast(String),
    #[error("segment {0:?} contains whitespace")]
    Whitespace(String),
}

/// A concrete, wildcard-free bus address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subject(String);

impl Subject {
    pub fn parse(raw: &str) -> Result<Self, SubjectError> {
        validate_segments(raw)?;
        for seg in raw.split('.') {
            if seg == "*" || seg == ">" {
                return Err(SubjectError::WildcardInSubject(raw.to_string()));
            }
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// The final segment. Agent subjects encode the session id here
    /// (`relay.agent.<session>`).
    pub fn last_segment(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// True if this subject is a dead-letter sibling (`*.dlq`).
    pub fn is_dead_letter(&self) -> bool {
        self.last_segment() == "dlq"
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Subject {
    type Error = SubjectError;

    fn try_from(s: String) -> Result<Self, SubjectError> {
        Subject::parse(&s)
    }
}

impl From<Subject> for String {
    fn from(s: Subject) -> String {
        s.0
    }
}

/// A subscription pattern: a subject with optional `*` / trailing `>` wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectPattern(String);

impl SubjectPattern {
    pub fn parse(raw: &str) -> Result<Self, SubjectError> {
        validate_segments(raw)?;
        let segments: Vec<&str> = raw.split('.').collect();
        for (i, seg) in segments.iter().enumerate() {
            if *seg == ">" && i + 1 != segments.len() {
                return Err(SubjectError::TailWildcardNotLast(raw.to_string()));
            }
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Match a concrete subject against this pattern.
    ///
    /// `*` consumes exactly one segment; `>` consumes one or more trailing
    /// segments (so `relay.>` does not match the bare subject `relay`).
    pub fn matches(&self, subject: &Subject) -> bool {
        let mut pat = self.0.split('.');
        let mut sub = subject.segments();
        loop {
            match (pat.next(), sub.next()) {
                (Some(">"), Some(_)) => return true,
                (Some(">"), None) => return false,
                (Some("*"), Some(_)) => continue,
                (Some(p), Some(s)) if p == s => continue,
                (Some(_), Some(_)) => return false,
                (Some(_), None) | (None, Some(_)) => return false,
                (None, None) => return true,
            }
        }
    }
}

impl std::fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SubjectPattern {
    type Error = SubjectError;

    fn try_from(s: String) -> Result<Self, SubjectError> {
        SubjectPattern::parse(&s)
    }
}

impl From<SubjectPattern> for String {
    fn from(p: SubjectPattern) -> String {
        p.0
    }
}

impl From<Subject> for SubjectPattern {
    /// A concrete subject is also a valid (exact-match) pattern.
    fn from(s: Subject) -> Self {
        Self(s.0)
    }
}

fn validate_segments(raw: &str) -> Result<(), SubjectError> {
    if raw.is_empty() {
        return Err(SubjectError::Empty);
    }
    for seg in raw.split('.') {
        if seg.is_empty() {
            return Err(SubjectError::EmptySegment(raw.to_string()));
        }
        if seg.chars().any(char::is_whitespace) {
            return Err(SubjectError::Whitespace(seg.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "subject_tests.rs"]
mod tests;
