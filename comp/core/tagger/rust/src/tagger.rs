// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use dd_agent_telemetry::Telemetry;
use log::{debug, info, trace, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::collector::WorkloadMetaCollector;
use crate::config::TaggerConfig;
use crate::entity::EntityTags;
use crate::errors::Error;
use crate::origin::{OriginInfo, ProductOrigin};
use crate::provider::{ContainerMetaProvider, PodContainerIndex};
use crate::store::TagStore;
use crate::subscription::{DeliveryPolicy, Subscription, SubscriptionFilter};
use crate::taglist::{TagAccumulator, compute_tags_hash};
use crate::types::{EntityId, StandardTags, TagCardinality, TagInfo};
use crate::workloadmeta::{EventBundle, WorkloadMetaSource};

const STATIC_SOURCE: &str = "static";
const SUBSCRIBER_NAME: &str = "tagger";
const TLM_UDP_ORIGIN_DETECTION_ERROR: &str = "udp_origin_detection_error";

const RESOLUTION_TIMEOUT: Duration = Duration::from_secs(1);
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// One entity in the `/tagger-list` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggerListEntity {
    /// Tags keyed by the source that reported them.
    pub tags: BTreeMap<String, Vec<String>>,
    pub cardinality: TagCardinality,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaggerListResponse {
    pub entities: BTreeMap<String, TaggerListEntity>,
}

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Local tagger fed by the workload metadata store.
pub struct Tagger {
    config: TaggerConfig,
    store: Arc<TagStore>,
    collector: WorkloadMetaCollector,
    pod_index: Arc<PodContainerIndex>,
    provider: Arc<dyn ContainerMetaProvider>,
    workloadmeta: Arc<dyn WorkloadMetaSource>,
    telemetry: Telemetry,
    running: Mutex<Option<Running>>,
}

impl Tagger {
    pub fn new(
        config: TaggerConfig,
        workloadmeta: Arc<dyn WorkloadMetaSource>,
        telemetry: Telemetry,
    ) -> Self {
        let pod_index = Arc::new(PodContainerIndex::new());
        Self {
            store: Arc::new(TagStore::new(
                config.tagger_subscription_buffer_size,
                telemetry.clone(),
            )),
            collector: WorkloadMetaCollector::new(config.metadata_as_tags()),
            provider: pod_index.clone(),
            pod_index,
            workloadmeta,
            telemetry,
            config,
            running: Mutex::new(None),
        }
    }

    /// Replace the container resolver. By default containers are resolved
    /// from the pods seen in workload metadata.
    pub fn with_provider(mut self, provider: Arc<dyn ContainerMetaProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn config(&self) -> &TaggerConfig {
        &self.config
    }

    pub fn checks_cardinality(&self) -> TagCardinality {
        self.config.checks_tag_cardinality
    }

    pub fn dogstatsd_cardinality(&self) -> TagCardinality {
        self.config.dogstatsd_tag_cardinality
    }

    fn running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register the static global tags and start consuming workload
    /// metadata events.
    pub async fn start(&self) -> Result<(), Error> {
        if self.running().is_some() {
            return Err(Error::AlreadyStarted);
        }

        let global_tags = self.config.global_tags();
        if !global_tags.is_empty() {
            self.store
                .process_tag_info(vec![TagInfo {
                    low_card_tags: global_tags,
                    ..TagInfo::new(STATIC_SOURCE, EntityId::global())
                }])
                .await;
        }

        let events = self.workloadmeta.subscribe(SUBSCRIBER_NAME);
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            self.store.clone(),
            self.collector.clone(),
            self.pod_index.clone(),
            events,
            stop_rx,
        ));

        let mut running = self.running();
        if running.is_some() {
            // Lost a race against a concurrent start.
            handle.abort();
            return Err(Error::AlreadyStarted);
        }
        *running = Some(Running { stop, handle });
        info!("tagger started");
        Ok(())
    }

    /// Stop the collector loop. Calling it twice, or without a successful
    /// start, is fine.
    pub async fn stop(&self) {
        let Some(running) = self.running().take() else {
            return;
        };
        let _ = running.stop.send(true);
        if let Err(e) = running.handle.await {
            warn!("tagger loop ended abnormally: {e}");
        }
        info!("tagger stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    // -- queries --

    pub fn tag(&self, id: &EntityId, cardinality: TagCardinality) -> Result<Vec<String>, Error> {
        self.store
            .lookup(id, cardinality)
            .ok_or_else(|| Error::EntityUnknown(id.clone()))
    }

    /// Same as [`Tagger::tag`] with the `prefix://id` form of the entity.
    pub fn legacy_tag(&self, entity: &str, cardinality: TagCardinality) -> Result<Vec<String>, Error> {
        let id: EntityId = entity.parse()?;
        self.tag(&id, cardinality)
    }

    pub fn accumulate_tags_for(
        &self,
        id: &EntityId,
        cardinality: TagCardinality,
        acc: &mut dyn TagAccumulator,
    ) -> Result<(), Error> {
        if self.store.accumulate(id, cardinality, acc) {
            Ok(())
        } else {
            Err(Error::EntityUnknown(id.clone()))
        }
    }

    pub fn standard(&self, id: &EntityId) -> Result<StandardTags, Error> {
        self.store
            .standard(id)
            .ok_or_else(|| Error::EntityUnknown(id.clone()))
    }

    pub fn get_entity(&self, id: &EntityId) -> Result<EntityTags, Error> {
        self.store
            .get_entity(id)
            .ok_or_else(|| Error::EntityUnknown(id.clone()))
    }

    /// Hash of the entity's tags, empty if the entity is unknown.
    pub fn get_entity_hash(&self, id: &EntityId, cardinality: TagCardinality) -> String {
        match self.tag(id, cardinality) {
            Ok(tags) => format!("{:016x}", compute_tags_hash(&tags)),
            Err(_) => String::new(),
        }
    }

    /// Tags that apply to everything the agent sends.
    pub fn global_tags(&self, cardinality: TagCardinality) -> Vec<String> {
        self.store
            .lookup(&EntityId::global(), cardinality)
            .unwrap_or_default()
    }

    /// Tags of the container the agent runs in. Empty outside containers.
    pub async fn agent_tags(&self, cardinality: TagCardinality) -> Result<Vec<String>, Error> {
        match self.provider.self_container_id().await? {
            Some(id) if !id.is_empty() => self.tag(&EntityId::container(id), cardinality),
            _ => Ok(Vec::new()),
        }
    }

    pub fn list(&self) -> TaggerListResponse {
        let entities = self
            .store
            .list()
            .into_iter()
            .map(|entity| {
                (
                    entity.entity_id().to_string(),
                    TaggerListEntity {
                        tags: entity.tags_by_source(),
                        cardinality: TagCardinality::High,
                    },
                )
            })
            .collect();
        TaggerListResponse { entities }
    }

    // -- mutations --

    /// Feed tags from a source other than workload metadata.
    pub async fn process_tag_info(&self, infos: Vec<TagInfo>) {
        self.store.process_tag_info(infos).await;
    }

    pub async fn prune(&self) {
        self.store.prune(SystemTime::now()).await;
    }

    pub async fn subscribe(
        &self,
        name: &str,
        filter: SubscriptionFilter,
        policy: DeliveryPolicy,
    ) -> Subscription {
        self.store.subscribe(name, filter, policy).await
    }

    pub async fn unsubscribe(&self, id: &str) {
        self.store.unsubscribe(id).await;
    }

    // -- origin detection --

    fn origin_cardinality(&self, requested: &str) -> TagCardinality {
        if requested.is_empty() {
            return self.config.dogstatsd_tag_cardinality;
        }
        requested.parse().unwrap_or_else(|e| {
            trace!("could not parse origin cardinality: {e}");
            self.config.dogstatsd_tag_cardinality
        })
    }

    fn accumulate_or_trace(&self, id: EntityId, cardinality: TagCardinality, acc: &mut dyn TagAccumulator) {
        if id.is_empty() {
            return;
        }
        if let Err(e) = self.accumulate_tags_for(&id, cardinality, acc) {
            trace!("cannot get tags for entity {id}: {e}");
        }
    }

    /// Container id for the cgroup inode, bounded by the resolution timeout.
    async fn resolve_inode(&self, inode: u64) -> Result<String, Error> {
        match tokio::time::timeout(RESOLUTION_TIMEOUT, self.provider.container_id_for_inode(inode)).await {
            Ok(result) => result,
            Err(_) => Err(Error::ResolutionTimeout(format!("inode {inode}"))),
        }
    }

    async fn resolve_external(&self, origin: &OriginInfo) -> Result<String, Error> {
        let external = &origin.external_data;
        let lookup = self.provider.container_id_for_pod_container(
            &external.pod_uid,
            &external.container_name,
            external.init,
        );
        match tokio::time::timeout(RESOLUTION_TIMEOUT, lookup).await {
            Ok(result) => result,
            Err(_) => Err(Error::ResolutionTimeout(format!(
                "{}/{}",
                external.pod_uid, external.container_name
            ))),
        }
    }

    /// Append the tags of the most specific entities the origin hints point
    /// to, followed by the global tags. Unknown entities are skipped.
    ///
    /// With a `none` cardinality the hints are ignored and only global tags
    /// are added.
    pub async fn enrich_tags(&self, acc: &mut (dyn TagAccumulator + Send), mut origin: OriginInfo) {
        let cardinality = self.origin_cardinality(&origin.cardinality);
        let none_requested = cardinality == TagCardinality::None;

        let mut product = origin.product_origin;
        if !self.config.origin_detection_unified && product == ProductOrigin::DogStatsD {
            product = ProductOrigin::DogStatsDLegacy;
        }

        if origin.local_data.container_id.is_empty() && origin.local_data.inode != 0 {
            match self.resolve_inode(origin.local_data.inode).await {
                Ok(id) => origin.local_data.container_id = id,
                Err(e) => trace!(
                    "failed to resolve container id from inode {}: {e}",
                    origin.local_data.inode
                ),
            }
        }

        match product {
            ProductOrigin::DogStatsDLegacy => {
                if none_requested && self.config.dogstatsd_origin_optout_enabled {
                    origin.clear();
                } else {
                    self.enrich_legacy(acc, &origin, cardinality);
                }
            }
            _ => {
                if none_requested {
                    origin.clear();
                } else {
                    self.enrich_unified(acc, &origin, cardinality).await;
                }
            }
        }

        self.accumulate_or_trace(EntityId::global(), cardinality, acc);
    }

    fn enrich_legacy(&self, acc: &mut dyn TagAccumulator, origin: &OriginInfo, cardinality: TagCardinality) {
        let pod_uid = origin.local_data.pod_uid.as_str();
        let container_id = origin.local_data.container_id.as_str();

        // The socket origin loses against a client-provided pod uid only when
        // entity id precedence is enabled.
        if let Some(socket_id) = origin.socket_container_id()
            && (pod_uid.is_empty() || !self.config.dogstatsd_entity_id_precedence)
        {
            self.accumulate_or_trace(EntityId::container(socket_id), cardinality, acc);
        }

        let from_client = if !pod_uid.is_empty() && pod_uid != "none" {
            Some(EntityId::pod(pod_uid))
        } else if pod_uid.is_empty() && !container_id.is_empty() {
            Some(EntityId::container(container_id))
        } else {
            None
        };

        if let Some(id) = from_client
            && let Err(e) = self.accumulate_tags_for(&id, cardinality, acc)
        {
            self.telemetry.count(TLM_UDP_ORIGIN_DETECTION_ERROR, 1, &[]);
            trace!("cannot get tags for entity {id}: {e}");
        }
    }

    async fn enrich_unified(&self, acc: &mut (dyn TagAccumulator + Send), origin: &OriginInfo, cardinality: TagCardinality) {
        if let Some(socket_id) = origin.socket_container_id() {
            self.accumulate_or_trace(EntityId::container(socket_id), cardinality, acc);
        }
        self.accumulate_or_trace(
            EntityId::container(&origin.local_data.container_id),
            cardinality,
            acc,
        );
        self.accumulate_or_trace(EntityId::pod(&origin.local_data.pod_uid), cardinality, acc);
        self.accumulate_or_trace(EntityId::pod(&origin.external_data.pod_uid), cardinality, acc);

        if origin.external_data.is_empty() {
            return;
        }
        match self.resolve_external(origin).await {
            Ok(id) => self.accumulate_or_trace(EntityId::container(id), cardinality, acc),
            Err(e) => debug!("failed to resolve container from external data: {e}"),
        }
    }
}

async fn run(
    store: Arc<TagStore>,
    collector: WorkloadMetaCollector,
    pod_index: Arc<PodContainerIndex>,
    mut events: mpsc::Receiver<EventBundle>,
    mut stop: watch::Receiver<bool>,
) {
    let mut prune = tokio::time::interval(PRUNE_INTERVAL);
    prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.changed() => {
                debug!("tagger loop received stop signal");
                return;
            }
            bundle = events.recv() => {
                let Some(bundle) = bundle else {
                    warn!("workload metadata stream closed, tagger loop exiting");
                    return;
                };
                for event in &bundle {
                    pod_index.observe(event);
                }
                let infos = collector.process_bundle(&bundle);
                debug!("processing {} tag infos from {} workload events", infos.len(), bundle.len());
                if !unless_stopped(&mut stop, store.process_tag_info(infos)).await {
                    return;
                }
            }
            _ = prune.tick() => {
                if !unless_stopped(&mut stop, store.prune(SystemTime::now())).await {
                    return;
                }
            }
        }
    }
}

/// Drive `work` to completion unless the stop signal fires first. Publishing
/// can wait on a blocking subscriber, so it must not delay shutdown.
async fn unless_stopped(stop: &mut watch::Receiver<bool>, work: impl Future<Output = ()>) -> bool {
    tokio::select! {
        () = work => true,
        _ = stop.changed() => {
            debug!("tagger loop stopped while publishing");
            false
        }
    }
}
