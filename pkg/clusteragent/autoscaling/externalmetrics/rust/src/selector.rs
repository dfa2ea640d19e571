// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Kubernetes-style label selectors, as sent by autoscalers.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use crate::errors::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, values) => labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(k, values) => labels.get(k).is_none_or(|v| !values.contains(v)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        }
    }
}

/// A conjunction of requirements. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')
}

fn is_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn parse_key(key: &str) -> Result<String, String> {
    if key.is_empty() {
        return Err("missing key".to_string());
    }
    if !key.chars().all(is_key_char) {
        return Err(format!("invalid key {key:?}"));
    }
    Ok(key.to_string())
}

fn parse_value(value: &str) -> Result<String, String> {
    let value = value.trim();
    if !value.chars().all(is_value_char) {
        return Err(format!("invalid value {value:?}"));
    }
    Ok(value.to_string())
}

fn parse_set(raw: &str) -> Result<BTreeSet<String>, String> {
    let inner = raw
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| format!("expected parenthesized values, got {raw:?}"))?;
    let values = inner
        .split(',')
        .map(|v| match v.trim() {
            "" => Err("empty value in set".to_string()),
            v => parse_value(v),
        })
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(values)
}

fn parse_requirement(raw: &str) -> Result<Requirement, String> {
    let req = raw.trim();
    if req.is_empty() {
        return Err("empty requirement".to_string());
    }
    if let Some(key) = req.strip_prefix('!') {
        return Ok(Requirement::NotExists(parse_key(key.trim())?));
    }

    let key_end = req.find(|c| !is_key_char(c)).unwrap_or(req.len());
    let (key, rest) = req.split_at(key_end);
    let key = parse_key(key)?;
    let spaced = rest.starts_with(char::is_whitespace);
    let rest = rest.trim_start();

    if rest.is_empty() {
        Ok(Requirement::Exists(key))
    } else if let Some(value) = rest.strip_prefix("!=") {
        Ok(Requirement::NotEquals(key, parse_value(value)?))
    } else if let Some(value) = rest.strip_prefix("==") {
        Ok(Requirement::Equals(key, parse_value(value)?))
    } else if let Some(value) = rest.strip_prefix('=') {
        Ok(Requirement::Equals(key, parse_value(value)?))
    } else if let Some(set) = rest.strip_prefix("notin").filter(|_| spaced) {
        Ok(Requirement::NotIn(key, parse_set(set)?))
    } else if let Some(set) = rest.strip_prefix("in").filter(|_| spaced) {
        Ok(Requirement::In(key, parse_set(set)?))
    } else {
        Err(format!("unexpected {rest:?} after key {key:?}"))
    }
}

/// Split on commas outside parentheses.
fn split_requirements(selector: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(selector.get(start..i).unwrap_or_default());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(selector.get(start..).unwrap_or_default());
    parts
}

impl FromStr for LabelSelector {
    type Err = ProviderError;

    fn from_str(selector: &str) -> Result<Self, Self::Err> {
        if selector.trim().is_empty() {
            return Ok(Self::everything());
        }
        let requirements = split_requirements(selector)
            .into_iter()
            .map(parse_requirement)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| ProviderError::InvalidSelector {
                selector: selector.to_string(),
                reason,
            })?;
        Ok(Self { requirements })
    }
}
