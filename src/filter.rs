//! Allow/deny filtering of bottleneck ids
//!
//! Both patterns are optional regular expressions matched against the
//! bottleneck id:
//! - deny matches: excluded, regardless of allow
//! - allow absent: included
//! - allow present: included only if it matches

use crate::error::{Result, SurveyError};
use regex::Regex;

/// Filter that determines which bottlenecks a survey records
#[derive(Debug, Clone, Default)]
pub struct BottleneckFilter {
    allow: Option<Regex>,
    deny: Option<Regex>,
}

impl BottleneckFilter {
    /// Create a filter that includes every bottleneck
    pub fn all() -> Self {
        Self::default()
    }

    /// Compile optional allow and deny patterns
    ///
    /// Empty patterns are treated as absent.
    pub fn from_patterns(allow: Option<&str>, deny: Option<&str>) -> Result<Self> {
        Ok(Self {
            allow: compile(allow)?,
            deny: compile(deny)?,
        })
    }

    pub fn allow_pattern(&self) -> Option<&str> {
        self.allow.as_ref().map(Regex::as_str)
    }

    pub fn deny_pattern(&self) -> Option<&str> {
        self.deny.as_ref().map(Regex::as_str)
    }

    /// Check if a bottleneck should be recorded
    pub fn should_survey(&self, bottleneck_id: &str) -> bool {
        if let Some(deny) = &self.deny {
            if deny.is_match(bottleneck_id) {
                return false;
            }
        }
        match &self.allow {
            None => true,
            Some(allow) => allow.is_match(bottleneck_id),
        }
    }
}

fn compile(pattern: Option<&str>) -> Result<Option<Regex>> {
    match pattern.map(str::trim) {
        None | Some("") => Ok(None),
        Some(pattern) => Regex::new(pattern)
            .map(Some)
            .map_err(|source| SurveyError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }),
    }
}
