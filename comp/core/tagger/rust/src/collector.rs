// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Tag extraction from workload metadata events.
//!
//! Extraction is a pure function of the event: the same event always yields
//! the same tag infos, which makes replaying an event a no-op in the store.

use std::collections::HashMap;

use log::debug;
use serde_json::Value;

use crate::labels::{MetadataAsTags, node_labels_with_role};
use crate::normalize::normalize_tag_value;
use crate::taglist::TagList;
use crate::types::{EntityId, EntityIdPrefix, StandardTags, TagInfo};
use crate::ust;
use crate::workloadmeta::{
    Container, Entity, Event, EventType, KubernetesDeployment, KubernetesNode, KubernetesPod,
    Process,
};

const SOURCE_PREFIX: &str = "workloadmeta";

const STANDARD_LABEL_PREFIX: &str = "tags.datadoghq.com/";
const DOCKER_STANDARD_LABEL_PREFIX: &str = "com.datadoghq.tags.";
const AD_TAGS_ANNOTATION: &str = "ad.datadoghq.com/tags";

// Characters kubernetes uses for pod template hashes.
const POD_TEMPLATE_HASH_CHARS: &str = "bcdfghjklmnpqrstvwxz2456789";

fn source(entity: &Entity) -> String {
    format!("{SOURCE_PREFIX}-{}", entity.kind().as_str())
}

fn tag_info(source: &str, id: EntityId, tags: TagList, parent: Option<EntityId>) -> TagInfo {
    let computed = tags.compute();
    TagInfo {
        low_card_tags: computed.low,
        orchestrator_card_tags: computed.orchestrator,
        high_card_tags: computed.high,
        standard_tags: computed.standard,
        parent,
        ..TagInfo::new(source, id)
    }
}

fn add_standard(tags: &mut TagList, standard: &StandardTags) {
    if let Some(env) = &standard.env {
        tags.add_standard("env", env);
    }
    if let Some(version) = &standard.version {
        tags.add_standard("version", version);
    }
    if let Some(service) = &standard.service {
        tags.add_standard("service", service);
    }
}

fn add_standard_labels(tags: &mut TagList, labels: &HashMap<String, String>, prefix: &str) {
    for (key, value) in labels {
        if let Some(name) = key.strip_prefix(prefix)
            && matches!(name, "env" | "version" | "service")
        {
            tags.add_standard(name, value);
        }
    }
}

/// Deployment owning a replica set named `<deployment>-<pod template hash>`.
pub fn deployment_for_replica_set(name: &str) -> Option<&str> {
    let (deployment, hash) = name.rsplit_once('-')?;
    if deployment.is_empty()
        || hash.len() < 3
        || !hash.chars().all(|c| POD_TEMPLATE_HASH_CHARS.contains(c))
    {
        return None;
    }
    Some(deployment)
}

fn owner_tag_name(kind: &str) -> Option<&'static str> {
    match kind {
        "Deployment" => Some("kube_deployment"),
        "ReplicaSet" => Some("kube_replica_set"),
        "StatefulSet" => Some("kube_stateful_set"),
        "DaemonSet" => Some("kube_daemon_set"),
        "Job" => Some("kube_job"),
        "CronJob" => Some("kube_cronjob"),
        _ => None,
    }
}

/// `ad.datadoghq.com/tags` holds a JSON object of tag name to a value or a
/// list of values.
fn add_ad_tags(tags: &mut TagList, annotations: &HashMap<String, String>) {
    let Some(raw) = annotations.get(AD_TAGS_ANNOTATION) else {
        return;
    };
    let parsed: HashMap<String, Value> = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("ignoring malformed {AD_TAGS_ANNOTATION} annotation: {e}");
            return;
        }
    };
    for (name, value) in parsed {
        match value {
            Value::String(v) => tags.add_low(&name, &v),
            Value::Array(values) => {
                for v in values.iter().filter_map(Value::as_str) {
                    tags.add_low(&name, v);
                }
            }
            _ => {}
        }
    }
}

/// Turns workload metadata events into tag infos.
#[derive(Debug, Clone, Default)]
pub struct WorkloadMetaCollector {
    metadata_as_tags: MetadataAsTags,
}

impl WorkloadMetaCollector {
    pub fn new(metadata_as_tags: MetadataAsTags) -> Self {
        Self { metadata_as_tags }
    }

    pub fn process_bundle(&self, events: &[Event]) -> Vec<TagInfo> {
        events.iter().flat_map(|e| self.process_event(e)).collect()
    }

    pub fn process_event(&self, event: &Event) -> Vec<TagInfo> {
        let source = source(&event.entity);
        let infos = match &event.entity {
            Entity::Container(container) => vec![self.container(&source, container)],
            Entity::KubernetesPod(pod) => self.pod(&source, pod),
            Entity::KubernetesDeployment(deployment) => vec![self.deployment(&source, deployment)],
            Entity::KubernetesNode(node) => vec![self.node(&source, node)],
            Entity::Process(process) => vec![self.process(&source, process)],
        };
        match event.event_type {
            EventType::Set => infos,
            EventType::Unset => infos
                .into_iter()
                .filter_map(|info| info.entity_id)
                .map(|id| TagInfo::deletion(&source, id))
                .collect(),
        }
    }

    fn container(&self, source: &str, container: &Container) -> TagInfo {
        let mut tags = TagList::new();
        let image = &container.image;
        tags.add_low("docker_image", &image.raw_name);
        tags.add_low("image_name", &image.name);
        tags.add_low("short_image", &image.short_name);
        tags.add_low("image_tag", &image.tag);
        tags.add_low("runtime", &container.runtime);
        tags.add_high("container_name", &container.name);
        tags.add_high("container_id", &container.id);

        add_standard(&mut tags, &ust::from_envs(&container.env));
        add_standard_labels(&mut tags, &container.labels, DOCKER_STANDARD_LABEL_PREFIX);

        let parent = container
            .pod_uid
            .as_deref()
            .filter(|uid| !uid.is_empty())
            .map(EntityId::pod);
        tag_info(source, EntityId::container(&container.id), tags, parent)
    }

    fn pod_tags(&self, pod: &KubernetesPod) -> TagList {
        let mut tags = TagList::new();
        tags.add_low("kube_namespace", &pod.namespace);
        tags.add_low("pod_phase", &pod.phase.to_lowercase());
        tags.add_low("kube_qos", &pod.qos_class);
        tags.add_orchestrator("pod_name", &pod.name);

        for owner in &pod.owners {
            tags.add_low("kube_ownerref_kind", &owner.kind.to_lowercase());
            tags.add_orchestrator("kube_ownerref_name", &owner.name);
            if let Some(name) = owner_tag_name(&owner.kind) {
                tags.add_low(name, &owner.name);
            }
            if owner.kind == "ReplicaSet"
                && let Some(deployment) = deployment_for_replica_set(&owner.name)
            {
                tags.add_low("kube_deployment", deployment);
            }
        }

        add_standard_labels(&mut tags, &pod.labels, STANDARD_LABEL_PREFIX);
        add_ad_tags(&mut tags, &pod.annotations);
        self.metadata_as_tags.pod_labels.extract(&pod.labels, &mut tags);
        self.metadata_as_tags
            .pod_annotations
            .extract(&pod.annotations, &mut tags);
        tags
    }

    fn pod(&self, source: &str, pod: &KubernetesPod) -> Vec<TagInfo> {
        let tags = self.pod_tags(pod);
        let pod_id = EntityId::pod(&pod.uid);

        let containers = pod
            .containers
            .iter()
            .chain(pod.init_containers.iter())
            .filter(|c| !c.id.is_empty());
        let mut infos = Vec::with_capacity(1 + pod.containers.len());
        for container in containers {
            let mut container_tags = tags.clone();
            container_tags.add_low("kube_container_name", &normalize_tag_value(&container.name));
            container_tags.add_high("container_id", &container.id);
            infos.push(tag_info(
                source,
                EntityId::container(&container.id),
                container_tags,
                Some(pod_id.clone()),
            ));
        }
        infos.insert(0, tag_info(source, pod_id, tags, None));
        infos
    }

    fn deployment(&self, source: &str, deployment: &KubernetesDeployment) -> TagInfo {
        let mut tags = TagList::new();
        tags.add_low("kube_deployment", &deployment.name);
        tags.add_low("kube_namespace", &deployment.namespace);
        add_standard_labels(&mut tags, &deployment.labels, STANDARD_LABEL_PREFIX);

        let id = EntityId::new(
            EntityIdPrefix::KubernetesDeployment,
            format!("{}/{}", deployment.namespace, deployment.name),
        );
        tag_info(source, id, tags, None)
    }

    fn node(&self, source: &str, node: &KubernetesNode) -> TagInfo {
        let mut tags = TagList::new();
        tags.add_low("kube_node", &node.name);
        self.metadata_as_tags
            .node_labels
            .extract(&node_labels_with_role(&node.labels), &mut tags);
        self.metadata_as_tags
            .node_annotations
            .extract(&node.annotations, &mut tags);
        tag_info(
            source,
            EntityId::new(EntityIdPrefix::KubernetesNode, &node.name),
            tags,
            None,
        )
    }

    fn process(&self, source: &str, process: &Process) -> TagInfo {
        let mut tags = TagList::new();
        add_standard(&mut tags, &ust::from_process(&process.cmdline, &process.env));
        let parent = process
            .container_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(EntityId::container);
        tag_info(
            source,
            EntityId::new(EntityIdPrefix::Process, process.pid.to_string()),
            tags,
            parent,
        )
    }
}
