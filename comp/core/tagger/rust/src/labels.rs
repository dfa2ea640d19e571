// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::borrow::Cow;
use std::collections::HashMap;

use glob_match::glob_match;

use crate::normalize::{normalize_tag, normalize_tag_value};
use crate::taglist::TagList;

pub const NORMALIZED_ROLE_LABEL: &str = "kubernetes.io/role";
const NODE_ROLE_PREFIX: &str = "node-role.kubernetes.io/";
const KUBE_NODE_ROLE_TAG: &str = "kube_node_role";

const LABEL_PLACEHOLDER: &str = "%%label%%";
const ANNOTATION_PLACEHOLDER: &str = "%%annotation%%";

/// One `metadata key -> tag name` mapping, as configured by
/// `kubernetes_*_labels_as_tags` and friends.
///
/// Keys are matched case-insensitively. Keys containing `*` or `?` are globs
/// and the tag name may refer to the matched key through `%%label%%` or
/// `%%annotation%%`. A tag name starting with `+` is high cardinality.
#[derive(Debug, Clone, Default)]
pub struct LabelMapping {
    exact: HashMap<String, String>,
    globs: Vec<(String, String)>,
}

impl LabelMapping {
    pub fn new(mapping: &HashMap<String, String>) -> Self {
        let mut exact = HashMap::new();
        let mut globs = Vec::new();
        for (key, tag) in mapping {
            let key = key.to_lowercase();
            if key.contains(['*', '?']) {
                globs.push((key, tag.clone()));
            } else {
                exact.insert(key, tag.clone());
            }
        }
        // Deterministic output when several globs match.
        globs.sort();
        Self { exact, globs }
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.globs.is_empty()
    }

    fn with(mut self, key: &str, tag: &str) -> Self {
        self.exact
            .entry(key.to_lowercase())
            .or_insert_with(|| tag.to_string());
        self
    }

    /// Add the tags produced by `metadata` to `tags`.
    pub fn extract(&self, metadata: &HashMap<String, String>, tags: &mut TagList) {
        if self.is_empty() {
            return;
        }
        for (key, value) in metadata {
            let key = key.to_lowercase();
            if let Some(template) = self.exact.get(&key) {
                add_tag(tags, template, &key, value);
            }
            for (pattern, template) in &self.globs {
                if glob_match(pattern, &key) {
                    add_tag(tags, template, &key, value);
                }
            }
        }
    }
}

fn resolve_template<'a>(template: &'a str, key: &str) -> Cow<'a, str> {
    if template.contains(LABEL_PLACEHOLDER) || template.contains(ANNOTATION_PLACEHOLDER) {
        Cow::Owned(
            template
                .replace(LABEL_PLACEHOLDER, key)
                .replace(ANNOTATION_PLACEHOLDER, key),
        )
    } else {
        Cow::Borrowed(template)
    }
}

fn add_tag(tags: &mut TagList, template: &str, key: &str, value: &str) {
    let (high, template) = match template.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, template),
    };
    let name = normalize_tag(&resolve_template(template, key));
    let value = normalize_tag_value(value);
    if high {
        tags.add_high(&name, &value);
    } else {
        tags.add_low(&name, &value);
    }
}

/// Every metadata-as-tags mapping the collector applies.
#[derive(Debug, Clone, Default)]
pub struct MetadataAsTags {
    pub pod_labels: LabelMapping,
    pub pod_annotations: LabelMapping,
    pub node_labels: LabelMapping,
    pub node_annotations: LabelMapping,
}

impl MetadataAsTags {
    pub fn new(
        pod_labels: &HashMap<String, String>,
        pod_annotations: &HashMap<String, String>,
        node_labels: &HashMap<String, String>,
        node_annotations: &HashMap<String, String>,
    ) -> Self {
        Self {
            pod_labels: LabelMapping::new(pod_labels),
            pod_annotations: LabelMapping::new(pod_annotations),
            // The node role mapping is always there, user mappings win.
            node_labels: LabelMapping::new(node_labels)
                .with(NORMALIZED_ROLE_LABEL, KUBE_NODE_ROLE_TAG),
            node_annotations: LabelMapping::new(node_annotations),
        }
    }
}

/// Node labels with `node-role.kubernetes.io/<role>` folded into the
/// normalized `kubernetes.io/role` label.
pub fn node_labels_with_role(labels: &HashMap<String, String>) -> HashMap<String, String> {
    let mut out = labels.clone();
    if out.contains_key(NORMALIZED_ROLE_LABEL) {
        return out;
    }
    let mut roles: Vec<&str> = labels
        .keys()
        .filter_map(|key| key.strip_prefix(NODE_ROLE_PREFIX))
        .filter(|role| !role.is_empty())
        .collect();
    roles.sort_unstable();
    if let Some(role) = roles.first() {
        out.insert(NORMALIZED_ROLE_LABEL.to_string(), role.to_string());
    }
    out
}
