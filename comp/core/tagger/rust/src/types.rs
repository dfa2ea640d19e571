// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::Error;

const SEPARATOR: &str = "://";

/// Id of the entity holding the tags that apply to everything the agent sends.
pub const GLOBAL_ENTITY_ID: &str = "global-entity-id";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityIdPrefix {
    ContainerId,
    ContainerImageMetadata,
    EcsTask,
    Host,
    Internal,
    KubernetesDeployment,
    KubernetesMetadata,
    KubernetesNode,
    KubernetesPodUid,
    Process,
    Other(String),
}

impl EntityIdPrefix {
    pub fn as_str(&self) -> &str {
        match self {
            EntityIdPrefix::ContainerId => "container_id",
            EntityIdPrefix::ContainerImageMetadata => "container_image_metadata",
            EntityIdPrefix::EcsTask => "ecs_task",
            EntityIdPrefix::Host => "host",
            EntityIdPrefix::Internal => "internal",
            EntityIdPrefix::KubernetesDeployment => "kubernetes_deployment",
            EntityIdPrefix::KubernetesMetadata => "kubernetes_metadata",
            EntityIdPrefix::KubernetesNode => "kubernetes_node",
            EntityIdPrefix::KubernetesPodUid => "kubernetes_pod_uid",
            EntityIdPrefix::Process => "process",
            EntityIdPrefix::Other(prefix) => prefix,
        }
    }
}

impl From<&str> for EntityIdPrefix {
    fn from(prefix: &str) -> Self {
        match prefix {
            "container_id" => EntityIdPrefix::ContainerId,
            "container_image_metadata" => EntityIdPrefix::ContainerImageMetadata,
            "ecs_task" => EntityIdPrefix::EcsTask,
            "host" => EntityIdPrefix::Host,
            "internal" => EntityIdPrefix::Internal,
            "kubernetes_deployment" | "deployment" => EntityIdPrefix::KubernetesDeployment,
            "kubernetes_metadata" => EntityIdPrefix::KubernetesMetadata,
            "kubernetes_node" => EntityIdPrefix::KubernetesNode,
            "kubernetes_pod_uid" => EntityIdPrefix::KubernetesPodUid,
            "process" => EntityIdPrefix::Process,
            other => EntityIdPrefix::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EntityIdPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a tagged entity. The textual form is `prefix://id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    prefix: EntityIdPrefix,
    id: String,
}

impl EntityId {
    pub fn new(prefix: EntityIdPrefix, id: impl Into<String>) -> Self {
        Self {
            prefix,
            id: id.into(),
        }
    }

    pub fn container(id: impl Into<String>) -> Self {
        Self::new(EntityIdPrefix::ContainerId, id)
    }

    pub fn pod(uid: impl Into<String>) -> Self {
        Self::new(EntityIdPrefix::KubernetesPodUid, uid)
    }

    pub fn global() -> Self {
        Self::new(EntityIdPrefix::Internal, GLOBAL_ENTITY_ID)
    }

    pub fn prefix(&self) -> &EntityIdPrefix {
        &self.prefix
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.prefix, SEPARATOR, self.id)
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((prefix, id)) = s.split_once(SEPARATOR) else {
            return Err(Error::InvalidEntityId(s.to_string()));
        };
        if prefix.is_empty() || id.is_empty() {
            return Err(Error::InvalidEntityId(s.to_string()));
        }
        Ok(EntityId::new(EntityIdPrefix::from(prefix), id))
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Granularity of a tag set. Each level includes the tags of the levels
/// below it. `None` disables origin detection and reads as `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum TagCardinality {
    None,
    #[default]
    Low,
    Orchestrator,
    High,
}

impl FromStr for TagCardinality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(TagCardinality::None),
            "low" => Ok(TagCardinality::Low),
            "orch" | "orchestrator" => Ok(TagCardinality::Orchestrator),
            "high" => Ok(TagCardinality::High),
            _ => Err(Error::InvalidCardinality(s.to_string())),
        }
    }
}

impl fmt::Display for TagCardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagCardinality::None => write!(f, "none"),
            TagCardinality::Low => write!(f, "low"),
            TagCardinality::Orchestrator => write!(f, "orchestrator"),
            TagCardinality::High => write!(f, "high"),
        }
    }
}

impl Serialize for TagCardinality {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TagCardinality {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Tags a single source (collector) reports for an entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagInfo {
    pub source: String,
    pub entity_id: Option<EntityId>,
    pub low_card_tags: Vec<String>,
    pub orchestrator_card_tags: Vec<String>,
    pub high_card_tags: Vec<String>,
    pub standard_tags: Vec<String>,
    /// Owner of the entity (a container's pod, for instance).
    pub parent: Option<EntityId>,
    /// Removes this source's contribution instead of setting it.
    pub delete_entity: bool,
    pub expiry_date: Option<SystemTime>,
}

impl TagInfo {
    pub fn new(source: &str, entity_id: EntityId) -> Self {
        Self {
            source: source.to_string(),
            entity_id: Some(entity_id),
            ..Default::default()
        }
    }

    pub fn deletion(source: &str, entity_id: EntityId) -> Self {
        Self {
            delete_entity: true,
            ..Self::new(source, entity_id)
        }
    }
}

/// `{env, version, service}` for an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StandardTags {
    pub env: Option<String>,
    pub version: Option<String>,
    pub service: Option<String>,
}

impl StandardTags {
    pub fn from_tags<'a>(tags: impl IntoIterator<Item = &'a String>) -> Self {
        let mut standard = StandardTags::default();
        for tag in tags {
            let Some((key, value)) = tag.split_once(':') else {
                continue;
            };
            let slot = match key {
                "env" => &mut standard.env,
                "version" => &mut standard.version,
                "service" => &mut standard.service,
                _ => continue,
            };
            if slot.is_none() && !value.is_empty() {
                *slot = Some(value.to_string());
            }
        }
        standard
    }

    pub fn to_tags(&self) -> Vec<String> {
        let mut tags = Vec::new();
        if let Some(env) = &self.env {
            tags.push(format!("env:{env}"));
        }
        if let Some(version) = &self.version {
            tags.push(format!("version:{version}"));
        }
        if let Some(service) = &self.service {
            tags.push(format!("service:{service}"));
        }
        tags
    }

    pub fn is_empty(&self) -> bool {
        self.env.is_none() && self.version.is_none() && self.service.is_none()
    }
}
