// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::types::TagCardinality;

/// Collects tags by cardinality while an entity is being extracted.
#[derive(Debug, Default, Clone)]
pub struct TagList {
    low: BTreeSet<String>,
    orchestrator: BTreeSet<String>,
    high: BTreeSet<String>,
    standard: BTreeSet<String>,
}

/// Output of [`TagList::compute`]. Every list is sorted and deduplicated.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ComputedTags {
    pub low: Vec<String>,
    pub orchestrator: Vec<String>,
    pub high: Vec<String>,
    pub standard: Vec<String>,
}

impl TagList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, cardinality: TagCardinality, name: &str, value: &str) {
        if name.is_empty() || value.is_empty() {
            return;
        }
        let tag = format!("{name}:{value}");
        match cardinality {
            TagCardinality::None | TagCardinality::Low => self.low.insert(tag),
            TagCardinality::Orchestrator => self.orchestrator.insert(tag),
            TagCardinality::High => self.high.insert(tag),
        };
    }

    pub fn add_low(&mut self, name: &str, value: &str) {
        self.add(TagCardinality::Low, name, value);
    }

    pub fn add_orchestrator(&mut self, name: &str, value: &str) {
        self.add(TagCardinality::Orchestrator, name, value);
    }

    pub fn add_high(&mut self, name: &str, value: &str) {
        self.add(TagCardinality::High, name, value);
    }

    /// Standard tags are low cardinality tags that are also reported as
    /// `{env, version, service}`.
    pub fn add_standard(&mut self, name: &str, value: &str) {
        if name.is_empty() || value.is_empty() {
            return;
        }
        self.add_low(name, value);
        self.standard.insert(format!("{name}:{value}"));
    }

    /// Tag names starting with `+` are high cardinality.
    pub fn add_auto(&mut self, name: &str, value: &str) {
        match name.strip_prefix('+') {
            Some(name) => self.add_high(name, value),
            None => self.add_low(name, value),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.low.is_empty() && self.orchestrator.is_empty() && self.high.is_empty()
    }

    pub fn compute(self) -> ComputedTags {
        ComputedTags {
            low: self.low.into_iter().collect(),
            orchestrator: self.orchestrator.into_iter().collect(),
            high: self.high.into_iter().collect(),
            standard: self.standard.into_iter().collect(),
        }
    }
}

/// Destination for tags produced by the tagger on hot paths.
pub trait TagAccumulator {
    fn append(&mut self, tags: &[String]);
}

impl TagAccumulator for Vec<String> {
    fn append(&mut self, tags: &[String]) {
        self.extend_from_slice(tags);
    }
}

/// Accumulator that can be deduplicated and hashed once filled.
#[derive(Debug, Default, Clone)]
pub struct HashingTagsAccumulator {
    tags: Vec<String>,
}

impl HashingTagsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_uniq(&mut self) {
        self.tags.sort();
        self.tags.dedup();
    }

    pub fn get(&self) -> &[String] {
        &self.tags
    }

    pub fn into_tags(self) -> Vec<String> {
        self.tags
    }

    pub fn hash(&self) -> u64 {
        compute_tags_hash(&self.tags)
    }

    pub fn reset(&mut self) {
        self.tags.clear();
    }
}

impl TagAccumulator for HashingTagsAccumulator {
    fn append(&mut self, tags: &[String]) {
        self.tags.extend_from_slice(tags);
    }
}

/// Order-independent hash of a tag list.
pub fn compute_tags_hash(tags: &[String]) -> u64 {
    let mut sorted: Vec<&String> = tags.iter().collect();
    sorted.sort();
    sorted.dedup();
    let mut hasher = DefaultHasher::new();
    for tag in sorted {
        tag.hash(&mut hasher);
    }
    hasher.finish()
}
