// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;

use crate::labels::MetadataAsTags;
use crate::subscription::DEFAULT_SUBSCRIPTION_BUFFER_SIZE;
use crate::types::TagCardinality;

fn default_true() -> bool {
    true
}

fn default_subscription_buffer_size() -> usize {
    DEFAULT_SUBSCRIPTION_BUFFER_SIZE
}

fn default_listen_addr() -> String {
    "127.0.0.1:5010".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaggerConfig {
    #[serde(default)]
    pub checks_tag_cardinality: TagCardinality,
    #[serde(default)]
    pub dogstatsd_tag_cardinality: TagCardinality,
    #[serde(default)]
    pub dogstatsd_entity_id_precedence: bool,
    #[serde(default)]
    pub origin_detection_unified: bool,
    #[serde(default = "default_true")]
    pub dogstatsd_origin_optout_enabled: bool,
    #[serde(default)]
    pub kubernetes_pod_labels_as_tags: HashMap<String, String>,
    #[serde(default)]
    pub kubernetes_pod_annotations_as_tags: HashMap<String, String>,
    #[serde(default)]
    pub kubernetes_node_labels_as_tags: HashMap<String, String>,
    #[serde(default)]
    pub kubernetes_node_annotations_as_tags: HashMap<String, String>,
    /// Static tags applied to everything the agent sends.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub extra_tags: Vec<String>,
    #[serde(default = "default_subscription_buffer_size")]
    pub tagger_subscription_buffer_size: usize,
    #[serde(default = "default_listen_addr")]
    pub tagger_list_listen_addr: String,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            checks_tag_cardinality: TagCardinality::Low,
            dogstatsd_tag_cardinality: TagCardinality::Low,
            dogstatsd_entity_id_precedence: false,
            origin_detection_unified: false,
            dogstatsd_origin_optout_enabled: true,
            kubernetes_pod_labels_as_tags: HashMap::new(),
            kubernetes_pod_annotations_as_tags: HashMap::new(),
            kubernetes_node_labels_as_tags: HashMap::new(),
            kubernetes_node_annotations_as_tags: HashMap::new(),
            tags: Vec::new(),
            extra_tags: Vec::new(),
            tagger_subscription_buffer_size: DEFAULT_SUBSCRIPTION_BUFFER_SIZE,
            tagger_list_listen_addr: default_listen_addr(),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn override_parsed<T: FromStr>(key: &str, slot: &mut T)
where
    T::Err: std::fmt::Display,
{
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(e) => warn!("ignoring invalid {key}={raw:?}: {e}"),
    }
}

fn override_bool(key: &str, slot: &mut bool) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match parse_bool(&raw) {
        Some(value) => *slot = value,
        None => warn!("ignoring invalid boolean {key}={raw:?}"),
    }
}

fn override_list(key: &str, slot: &mut Vec<String>) {
    if let Ok(raw) = std::env::var(key) {
        *slot = raw.split_whitespace().map(str::to_string).collect();
    }
}

impl TaggerConfig {
    /// Apply the `DD_*` environment variables on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        override_parsed("DD_CHECKS_TAG_CARDINALITY", &mut self.checks_tag_cardinality);
        override_parsed(
            "DD_DOGSTATSD_TAG_CARDINALITY",
            &mut self.dogstatsd_tag_cardinality,
        );
        override_bool(
            "DD_DOGSTATSD_ENTITY_ID_PRECEDENCE",
            &mut self.dogstatsd_entity_id_precedence,
        );
        override_bool("DD_ORIGIN_DETECTION_UNIFIED", &mut self.origin_detection_unified);
        override_bool(
            "DD_DOGSTATSD_ORIGIN_OPTOUT_ENABLED",
            &mut self.dogstatsd_origin_optout_enabled,
        );
        override_list("DD_TAGS", &mut self.tags);
        override_list("DD_EXTRA_TAGS", &mut self.extra_tags);
        override_parsed(
            "DD_TAGGER_SUBSCRIPTION_BUFFER_SIZE",
            &mut self.tagger_subscription_buffer_size,
        );
        if let Ok(addr) = std::env::var("DD_TAGGER_LIST_LISTEN_ADDR") {
            self.tagger_list_listen_addr = addr;
        }
    }

    pub fn metadata_as_tags(&self) -> MetadataAsTags {
        MetadataAsTags::new(
            &self.kubernetes_pod_labels_as_tags,
            &self.kubernetes_pod_annotations_as_tags,
            &self.kubernetes_node_labels_as_tags,
            &self.kubernetes_node_annotations_as_tags,
        )
    }

    /// `tags` followed by `extra_tags`.
    pub fn global_tags(&self) -> Vec<String> {
        self.tags
            .iter()
            .chain(self.extra_tags.iter())
            .filter(|t| !t.is_empty())
            .cloned()
            .collect()
    }
}

/// Load the tagger configuration from a YAML file, then apply environment
/// overrides. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<TaggerConfig> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        if contents.trim().is_empty() {
            TaggerConfig::default()
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        }
    } else {
        warn!(
            "config file not found at {}, using defaults and environment",
            path.display()
        );
        TaggerConfig::default()
    };
    config.apply_env_overrides();
    Ok(config)
}
