//! Ordered allow/reject URL rules
//!
//! Rules are evaluated in order and the first one whose pattern matches
//! anywhere in the URL decides. A URL matching no rule is allowed.

use crate::errors::AccessError;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Allow,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleDecision {
    Allow,
    Reject,
}

#[derive(Debug, Clone)]
pub struct FilterRule {
    pub kind: RuleKind,
    pub pattern: Regex,
}

impl FilterRule {
    /// Parse an `allow:<pattern>` or `reject:<pattern>` entry
    pub fn parse(entry: &str) -> Result<Self, AccessError> {
        let Some((kind, pattern)) = entry.split_once(':') else {
            return Err(AccessError::invalid_filter(entry, "missing ':' separator"));
        };

        let kind = match kind {
            "allow" => RuleKind::Allow,
            "reject" => RuleKind::Reject,
            other => {
                return Err(AccessError::invalid_filter(
                    entry,
                    format!("unknown rule kind '{other}'"),
                ));
            }
        };

        if pattern.is_empty() {
            return Err(AccessError::invalid_filter(entry, "empty pattern"));
        }

        let pattern =
            Regex::new(pattern).map_err(|e| AccessError::invalid_filter(entry, e.to_string()))?;
        Ok(Self { kind, pattern })
    }

    pub fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }
}

/// Parse entries in order, stopping at the first invalid one
///
/// The rules parsed before the failure are returned alongside the error.
pub fn parse_filter_rules<S: AsRef<str>>(entries: &[S]) -> (Vec<FilterRule>, Option<AccessError>) {
    let mut rules = Vec::with_capacity(entries.len());
    for entry in entries {
        match FilterRule::parse(entry.as_ref()) {
            Ok(rule) => rules.push(rule),
            Err(e) => return (rules, Some(e)),
        }
    }
    (rules, None)
}

/// First-match decision for `url`
pub fn decide(rules: &[FilterRule], url: &str) -> RuleDecision {
    match rules.iter().find(|rule| rule.matches(url)) {
        Some(FilterRule {
            kind: RuleKind::Reject,
            ..
        }) => RuleDecision::Reject,
        _ => RuleDecision::Allow,
    }
}
