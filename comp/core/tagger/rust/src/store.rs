// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use dd_agent_telemetry::Telemetry;
use log::{debug, warn};

use crate::entity::EntityTags;
use crate::subscription::{
    DeliveryPolicy, EventType, StoreChange, Subscription, SubscriptionFilter, SubscriptionManager,
};
use crate::taglist::TagAccumulator;
use crate::types::{EntityId, StandardTags, TagCardinality, TagInfo};

/// Entity index of the tagger.
///
/// Reads only take the index read lock. Writers are serialized by the
/// publish lock so that subscribers see changes in the order they were
/// applied. Bundles are prepared while the index is still write-locked and
/// subscribers register under the read lock, so a new subscriber gets each
/// change either in its snapshot or as an event, never both.
pub struct TagStore {
    entities: RwLock<HashMap<EntityId, EntityTags>>,
    publish: tokio::sync::Mutex<()>,
    subscriptions: SubscriptionManager,
}

impl TagStore {
    pub fn new(subscription_buffer_size: usize, telemetry: Telemetry) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            publish: tokio::sync::Mutex::new(()),
            subscriptions: SubscriptionManager::new(subscription_buffer_size, telemetry),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<EntityId, EntityTags>> {
        self.entities.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EntityId, EntityTags>> {
        self.entities.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply a batch of tag infos and notify subscribers of the resulting
    /// changes.
    pub async fn process_tag_info(&self, infos: Vec<TagInfo>) {
        let _publish = self.publish.lock().await;
        let deliveries = {
            let mut entities = self.write();
            let changes = apply(&mut entities, infos);
            self.subscriptions.prepare(&changes)
        };
        self.subscriptions.deliver(deliveries).await;
    }

    /// Remove expired source contributions.
    pub async fn prune(&self, now: SystemTime) {
        let _publish = self.publish.lock().await;
        let deliveries = {
            let mut entities = self.write();
            let mut changes = Vec::new();
            let mut emptied = Vec::new();
            for (id, entity) in entities.iter_mut() {
                if !entity.prune(now) {
                    continue;
                }
                if entity.is_empty() {
                    emptied.push(id.clone());
                } else {
                    changes.push(StoreChange {
                        event_type: EventType::Modified,
                        entity: entity.clone(),
                    });
                }
            }
            for id in emptied {
                if let Some(removed) = entities.remove(&id) {
                    changes.push(StoreChange {
                        event_type: EventType::Deleted,
                        entity: removed,
                    });
                }
            }
            if !changes.is_empty() {
                debug!("pruned {} tagger entities", changes.len());
            }
            self.subscriptions.prepare(&changes)
        };
        self.subscriptions.deliver(deliveries).await;
    }

    pub fn lookup(&self, id: &EntityId, cardinality: TagCardinality) -> Option<Vec<String>> {
        self.read().get(id).map(|entity| entity.get(cardinality).to_vec())
    }

    /// Append the tags of `id` to `acc`. Returns false if the entity is
    /// unknown.
    pub fn accumulate(
        &self,
        id: &EntityId,
        cardinality: TagCardinality,
        acc: &mut dyn TagAccumulator,
    ) -> bool {
        match self.read().get(id) {
            Some(entity) => {
                acc.append(entity.get(cardinality));
                true
            }
            None => false,
        }
    }

    pub fn standard(&self, id: &EntityId) -> Option<StandardTags> {
        self.read().get(id).map(EntityTags::standard_tags)
    }

    pub fn get_entity(&self, id: &EntityId) -> Option<EntityTags> {
        self.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<EntityTags> {
        sorted(&self.read())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub async fn subscribe(
        &self,
        name: &str,
        filter: SubscriptionFilter,
        policy: DeliveryPolicy,
    ) -> Subscription {
        let entities = self.read();
        self.subscriptions
            .subscribe(name, filter, policy, &sorted(&entities))
    }

    pub async fn unsubscribe(&self, id: &str) {
        self.subscriptions.unsubscribe(id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }
}

fn apply(entities: &mut HashMap<EntityId, EntityTags>, infos: Vec<TagInfo>) -> Vec<StoreChange> {
    let mut changes = Vec::new();
    for info in infos {
        let Some(id) = info.entity_id.clone() else {
            warn!("ignoring tag info without entity id from source {}", info.source);
            continue;
        };
        let existed = entities.contains_key(&id);
        if info.delete_entity && !existed {
            continue;
        }

        let entity = entities
            .entry(id.clone())
            .or_insert_with(|| EntityTags::new(id.clone()));
        if !entity.apply(&info) {
            continue;
        }

        if entity.is_empty() {
            if let Some(removed) = entities.remove(&id) {
                debug!("entity {id} removed from the tagger");
                changes.push(StoreChange {
                    event_type: EventType::Deleted,
                    entity: removed,
                });
            }
        } else {
            changes.push(StoreChange {
                event_type: if existed {
                    EventType::Modified
                } else {
                    EventType::Added
                },
                entity: entity.clone(),
            });
        }
    }
    changes
}

fn sorted(entities: &HashMap<EntityId, EntityTags>) -> Vec<EntityTags> {
    let mut entities: Vec<EntityTags> = entities.values().cloned().collect();
    entities.sort_by(|a, b| a.entity_id().cmp(b.entity_id()));
    entities
}
