// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::Error;
use crate::workloadmeta::{Entity, Event, EventType};

/// Resolves container ids from the hints a client can send.
#[async_trait]
pub trait ContainerMetaProvider: Send + Sync {
    /// Container owning the cgroup with the given inode.
    async fn container_id_for_inode(&self, inode: u64) -> Result<String, Error>;

    /// Container named `container_name` in pod `pod_uid`.
    async fn container_id_for_pod_container(
        &self,
        pod_uid: &str,
        container_name: &str,
        init: bool,
    ) -> Result<String, Error>;

    /// Id of the container the agent runs in, if any.
    async fn self_container_id(&self) -> Result<Option<String>, Error> {
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexedContainer {
    name: String,
    id: String,
    init: bool,
}

/// Pod to container mapping built from workload metadata events.
///
/// Inode resolution needs cgroup access and is not handled here; it always
/// reports the container as not found.
#[derive(Debug, Default)]
pub struct PodContainerIndex {
    pods: RwLock<HashMap<String, Vec<IndexedContainer>>>,
    self_container_id: Option<String>,
}

impl PodContainerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_self_container_id(mut self, id: impl Into<String>) -> Self {
        self.self_container_id = Some(id.into());
        self
    }

    pub fn observe(&self, event: &Event) {
        let Entity::KubernetesPod(pod) = &event.entity else {
            return;
        };
        let mut pods = self
            .pods
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match event.event_type {
            EventType::Unset => {
                pods.remove(&pod.uid);
            }
            EventType::Set => {
                let containers = pod
                    .containers
                    .iter()
                    .map(|c| (c, false))
                    .chain(pod.init_containers.iter().map(|c| (c, true)))
                    .filter(|(c, _)| !c.id.is_empty())
                    .map(|(c, init)| IndexedContainer {
                        name: c.name.clone(),
                        id: c.id.clone(),
                        init,
                    })
                    .collect();
                pods.insert(pod.uid.clone(), containers);
            }
        }
    }

    fn lookup(&self, pod_uid: &str, container_name: &str, init: bool) -> Option<String> {
        let pods = self
            .pods
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pods.get(pod_uid)?
            .iter()
            .find(|c| c.name == container_name && c.init == init)
            .map(|c| c.id.clone())
    }
}

#[async_trait]
impl ContainerMetaProvider for PodContainerIndex {
    async fn container_id_for_inode(&self, inode: u64) -> Result<String, Error> {
        Err(Error::ContainerNotFound(format!("inode {inode}")))
    }

    async fn container_id_for_pod_container(
        &self,
        pod_uid: &str,
        container_name: &str,
        init: bool,
    ) -> Result<String, Error> {
        self.lookup(pod_uid, container_name, init)
            .ok_or_else(|| Error::ContainerNotFound(format!("{pod_uid}/{container_name}")))
    }

    async fn self_container_id(&self) -> Result<Option<String>, Error> {
        Ok(self.self_container_id.clone())
    }
}
