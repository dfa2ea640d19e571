// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use dd_agent_telemetry::Telemetry;
use log::{debug, warn};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;

use crate::entity::EntityTags;
use crate::types::{EntityId, EntityIdPrefix, StandardTags, TagCardinality};

pub const DEFAULT_SUBSCRIPTION_BUFFER_SIZE: usize = 1000;

const TLM_EVENTS_DROPPED: &str = "tagger.subscription_events_dropped";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// Entity state as seen by a subscriber at its cardinality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub tags: Vec<String>,
    pub standard: StandardTags,
    pub parent: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityEvent {
    pub event_type: EventType,
    pub entity: EntitySnapshot,
}

/// Which entities a subscriber wants, and how many tags.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    /// Empty means every prefix.
    pub prefixes: HashSet<EntityIdPrefix>,
    pub cardinality: TagCardinality,
}

impl SubscriptionFilter {
    pub fn new(cardinality: TagCardinality) -> Self {
        Self {
            prefixes: HashSet::new(),
            cardinality,
        }
    }

    pub fn with_prefix(mut self, prefix: EntityIdPrefix) -> Self {
        self.prefixes.insert(prefix);
        self
    }

    pub fn matches(&self, id: &EntityId) -> bool {
        self.prefixes.is_empty() || self.prefixes.contains(id.prefix())
    }
}

/// Delivery policy when the subscriber does not keep up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// The publisher waits for room in the channel; no event is lost.
    Blocking,
    /// Bundles that do not fit are dropped and counted.
    Lossy,
}

/// Change produced by the store, before per-subscriber filtering.
#[derive(Debug, Clone)]
pub(crate) struct StoreChange {
    pub event_type: EventType,
    pub entity: EntityTags,
}

fn snapshot(entity: &EntityTags, cardinality: TagCardinality) -> EntitySnapshot {
    EntitySnapshot {
        id: entity.entity_id().clone(),
        tags: entity.get(cardinality).to_vec(),
        standard: entity.standard_tags(),
        parent: entity.parent().cloned(),
    }
}

/// Receiving end handed to subscribers. Each message is a bundle of events
/// published together; the first bundle is the initial snapshot.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    receiver: mpsc::Receiver<Vec<EntityEvent>>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn recv(&mut self) -> Option<Vec<EntityEvent>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Vec<EntityEvent>> {
        self.receiver.try_recv().ok()
    }
}

struct Subscriber {
    filter: SubscriptionFilter,
    policy: DeliveryPolicy,
    sender: mpsc::Sender<Vec<EntityEvent>>,
    /// Flipped by `unsubscribe` so that a pending blocking send gives up.
    cancel: watch::Sender<bool>,
}

/// One bundle on its way to one subscriber. Built under the store locks,
/// sent without holding any.
pub(crate) struct Delivery {
    id: String,
    policy: DeliveryPolicy,
    sender: mpsc::Sender<Vec<EntityEvent>>,
    cancel: watch::Receiver<bool>,
    bundle: Vec<EntityEvent>,
}

pub(crate) struct SubscriptionManager {
    subscribers: Mutex<HashMap<String, Subscriber>>,
    next_id: AtomicU64,
    buffer_size: usize,
    telemetry: Telemetry,
}

impl SubscriptionManager {
    pub fn new(buffer_size: usize, telemetry: Telemetry) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            buffer_size: buffer_size.max(1),
            telemetry,
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<String, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a subscriber and queue `entities` as its first bundle.
    pub fn subscribe(
        &self,
        name: &str,
        filter: SubscriptionFilter,
        policy: DeliveryPolicy,
        entities: &[EntityTags],
    ) -> Subscription {
        let id = format!("{}-{}", name, self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.buffer_size);

        let initial: Vec<EntityEvent> = entities
            .iter()
            .filter(|entity| filter.matches(entity.entity_id()))
            .map(|entity| EntityEvent {
                event_type: EventType::Added,
                entity: snapshot(entity, filter.cardinality),
            })
            .collect();
        if !initial.is_empty() {
            // The channel is fresh so the snapshot always fits.
            let _ = sender.try_send(initial);
        }

        debug!("new tagger subscription {id}");
        let (cancel, _) = watch::channel(false);
        self.subscribers().insert(
            id.clone(),
            Subscriber {
                filter,
                policy,
                sender,
                cancel,
            },
        );
        Subscription { id, receiver }
    }

    /// Forget a subscriber. A delivery blocked on it is abandoned, and the
    /// receiver drains what was already queued before ending.
    pub fn unsubscribe(&self, id: &str) {
        if let Some(subscriber) = self.subscribers().remove(id) {
            subscriber.cancel.send_replace(true);
            debug!("tagger subscription {id} removed");
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers().len()
    }

    /// One bundle per subscriber with at least one matching change.
    pub fn prepare(&self, changes: &[StoreChange]) -> Vec<Delivery> {
        if changes.is_empty() {
            return Vec::new();
        }
        self.subscribers()
            .iter()
            .filter_map(|(id, subscriber)| {
                let bundle: Vec<EntityEvent> = changes
                    .iter()
                    .filter(|change| subscriber.filter.matches(change.entity.entity_id()))
                    .map(|change| EntityEvent {
                        event_type: change.event_type,
                        entity: snapshot(&change.entity, subscriber.filter.cardinality),
                    })
                    .collect();
                (!bundle.is_empty()).then(|| Delivery {
                    id: id.clone(),
                    policy: subscriber.policy,
                    sender: subscriber.sender.clone(),
                    cancel: subscriber.cancel.subscribe(),
                    bundle,
                })
            })
            .collect()
    }

    /// Send prepared bundles. Subscribers whose receiver is gone are
    /// removed.
    pub async fn deliver(&self, deliveries: Vec<Delivery>) {
        let mut closed = Vec::new();
        for delivery in deliveries {
            let Delivery {
                id,
                policy,
                sender,
                mut cancel,
                bundle,
            } = delivery;
            let delivered = match policy {
                DeliveryPolicy::Blocking => tokio::select! {
                    sent = sender.send(bundle) => sent.is_ok(),
                    _ = cancel.wait_for(|cancelled| *cancelled) => {
                        debug!("tagger subscription {id} went away during delivery");
                        true
                    }
                },
                DeliveryPolicy::Lossy => match sender.try_send(bundle) {
                    Ok(()) => true,
                    Err(TrySendError::Full(bundle)) => {
                        warn!(
                            "tagger subscription {id} is full, dropping {} events",
                            bundle.len()
                        );
                        self.telemetry.count(
                            TLM_EVENTS_DROPPED,
                            bundle.len() as u64,
                            &[("subscription", id.as_str())],
                        );
                        true
                    }
                    Err(TrySendError::Closed(_)) => false,
                },
            };
            if !delivered {
                closed.push(id);
            }
        }

        if closed.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers();
        for id in closed {
            debug!("tagger subscription {id} closed by receiver");
            subscribers.remove(&id);
        }
    }
}
