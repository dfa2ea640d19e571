// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dd_agent_telemetry::{MemoryRecorder, Telemetry};
use dd_tagger::workloadmeta::{Event, EventBundle, WorkloadMetaSource};
use dd_tagger::{
    ContainerMetaProvider, EntityEvent, EntityId, Error, Subscription, Tagger, TaggerConfig,
    TagInfo,
};
use tokio::sync::mpsc;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Workload metadata store driven by the test.
#[derive(Default)]
pub struct FakeWorkloadMeta {
    initial: Vec<Event>,
    senders: Mutex<Vec<mpsc::Sender<EventBundle>>>,
}

impl FakeWorkloadMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial(events: Vec<Event>) -> Self {
        Self {
            initial: events,
            senders: Mutex::new(Vec::new()),
        }
    }

    pub async fn push(&self, bundle: EventBundle) {
        let senders = self.senders.lock().unwrap().clone();
        for sender in senders {
            sender.send(bundle.clone()).await.unwrap();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().unwrap().len()
    }
}

impl WorkloadMetaSource for FakeWorkloadMeta {
    fn subscribe(&self, _name: &str) -> mpsc::Receiver<EventBundle> {
        let (sender, receiver) = mpsc::channel(16);
        if !self.initial.is_empty() {
            sender.try_send(self.initial.clone()).unwrap();
        }
        self.senders.lock().unwrap().push(sender);
        receiver
    }
}

/// Container resolver with canned answers.
#[derive(Default)]
pub struct FakeProvider {
    pub inodes: HashMap<u64, String>,
    pub pod_containers: HashMap<(String, String, bool), String>,
    pub self_container: Option<String>,
    /// Makes every lookup hang past the resolution deadline.
    pub stall: bool,
}

#[async_trait]
impl ContainerMetaProvider for FakeProvider {
    async fn container_id_for_inode(&self, inode: u64) -> Result<String, Error> {
        if self.stall {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.inodes
            .get(&inode)
            .cloned()
            .ok_or_else(|| Error::ContainerNotFound(format!("inode {inode}")))
    }

    async fn container_id_for_pod_container(
        &self,
        pod_uid: &str,
        container_name: &str,
        init: bool,
    ) -> Result<String, Error> {
        if self.stall {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.pod_containers
            .get(&(pod_uid.to_string(), container_name.to_string(), init))
            .cloned()
            .ok_or_else(|| Error::ContainerNotFound(format!("{pod_uid}/{container_name}")))
    }

    async fn self_container_id(&self) -> Result<Option<String>, Error> {
        Ok(self.self_container.clone())
    }
}

pub struct Harness {
    pub tagger: Arc<Tagger>,
    pub workloadmeta: Arc<FakeWorkloadMeta>,
    pub telemetry: MemoryRecorder,
}

pub fn harness(config: TaggerConfig, provider: FakeProvider) -> Harness {
    let workloadmeta = Arc::new(FakeWorkloadMeta::new());
    let telemetry = MemoryRecorder::new();
    let tagger = Tagger::new(
        config,
        workloadmeta.clone(),
        Telemetry::with_recorder(telemetry.clone()),
    )
    .with_provider(Arc::new(provider));
    Harness {
        tagger: Arc::new(tagger),
        workloadmeta,
        telemetry,
    }
}

pub fn tags(tags: &[&str]) -> Vec<String> {
    tags.iter().map(|t| t.to_string()).collect()
}

pub fn low_info(source: &str, id: EntityId, low: &[&str]) -> TagInfo {
    TagInfo {
        low_card_tags: tags(low),
        ..TagInfo::new(source, id)
    }
}

pub async fn next_bundle(sub: &mut Subscription) -> Vec<EntityEvent> {
    tokio::time::timeout(EVENT_TIMEOUT, sub.recv())
        .await
        .expect("timed out waiting for tagger events")
        .expect("subscription closed")
}

pub fn sorted(mut tags: Vec<String>) -> Vec<String> {
    tags.sort();
    tags.dedup();
    tags
}
