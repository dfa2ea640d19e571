// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Entities published by the workload metadata store.

use std::collections::HashMap;

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Container,
    KubernetesPod,
    KubernetesDeployment,
    KubernetesNode,
    Process,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Container => "container",
            Kind::KubernetesPod => "kubernetes_pod",
            Kind::KubernetesDeployment => "kubernetes_deployment",
            Kind::KubernetesNode => "kubernetes_node",
            Kind::Process => "process",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerImage {
    pub raw_name: String,
    pub name: String,
    pub short_name: String,
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub image: ContainerImage,
    pub labels: HashMap<String, String>,
    pub env: HashMap<String, String>,
    pub runtime: String,
    pub pod_uid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodContainer {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubernetesPod {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub phase: String,
    pub qos_class: String,
    pub owners: Vec<OwnerReference>,
    pub containers: Vec<PodContainer>,
    pub init_containers: Vec<PodContainer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubernetesDeployment {
    pub namespace: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubernetesNode {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Process {
    pub pid: u32,
    pub cmdline: Vec<String>,
    pub env: HashMap<String, String>,
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Container(Container),
    KubernetesPod(KubernetesPod),
    KubernetesDeployment(KubernetesDeployment),
    KubernetesNode(KubernetesNode),
    Process(Process),
}

impl Entity {
    pub fn kind(&self) -> Kind {
        match self {
            Entity::Container(_) => Kind::Container,
            Entity::KubernetesPod(_) => Kind::KubernetesPod,
            Entity::KubernetesDeployment(_) => Kind::KubernetesDeployment,
            Entity::KubernetesNode(_) => Kind::KubernetesNode,
            Entity::Process(_) => Kind::Process,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Set,
    Unset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: EventType,
    pub entity: Entity,
}

impl Event {
    pub fn set(entity: Entity) -> Self {
        Self {
            event_type: EventType::Set,
            entity,
        }
    }

    pub fn unset(entity: Entity) -> Self {
        Self {
            event_type: EventType::Unset,
            entity,
        }
    }
}

pub type EventBundle = Vec<Event>;

/// Source of workload metadata events. The first bundle sent to a new
/// subscriber holds every entity already known.
pub trait WorkloadMetaSource: Send + Sync {
    fn subscribe(&self, name: &str) -> mpsc::Receiver<EventBundle>;
}
