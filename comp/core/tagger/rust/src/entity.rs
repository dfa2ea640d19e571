// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::collections::{BTreeMap, BTreeSet};
use std::time::SystemTime;

use crate::types::{EntityId, StandardTags, TagCardinality, TagInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceTags {
    low: Vec<String>,
    orchestrator: Vec<String>,
    high: Vec<String>,
    standard: Vec<String>,
    parent: Option<EntityId>,
    expiry_date: Option<SystemTime>,
}

fn sorted_unique(tags: &[String]) -> Vec<String> {
    let set: BTreeSet<&String> = tags.iter().collect();
    set.into_iter().cloned().collect()
}

impl SourceTags {
    fn from_info(info: &TagInfo) -> Self {
        Self {
            low: sorted_unique(&info.low_card_tags),
            orchestrator: sorted_unique(&info.orchestrator_card_tags),
            high: sorted_unique(&info.high_card_tags),
            standard: sorted_unique(&info.standard_tags),
            parent: info.parent.clone(),
            expiry_date: info.expiry_date,
        }
    }
}

/// All tags known for one entity, merged across sources.
///
/// The per-cardinality lists are recomputed on every change so reads are a
/// plain slice borrow. `orchestrator` contains `low`, and `high` contains
/// `orchestrator`.
#[derive(Debug, Clone)]
pub struct EntityTags {
    entity_id: EntityId,
    sources: BTreeMap<String, SourceTags>,
    revision: u64,
    low: Vec<String>,
    orchestrator: Vec<String>,
    high: Vec<String>,
    standard: Vec<String>,
    parent: Option<EntityId>,
}

impl EntityTags {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            sources: BTreeMap::new(),
            revision: 0,
            low: Vec::new(),
            orchestrator: Vec::new(),
            high: Vec::new(),
            standard: Vec::new(),
            parent: None,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn parent(&self) -> Option<&EntityId> {
        self.parent.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn get(&self, cardinality: TagCardinality) -> &[String] {
        match cardinality {
            TagCardinality::None | TagCardinality::Low => &self.low,
            TagCardinality::Orchestrator => &self.orchestrator,
            TagCardinality::High => &self.high,
        }
    }

    pub fn standard(&self) -> &[String] {
        &self.standard
    }

    pub fn standard_tags(&self) -> StandardTags {
        StandardTags::from_tags(&self.standard)
    }

    /// Every tag of every source, keyed by source name.
    pub fn tags_by_source(&self) -> BTreeMap<String, Vec<String>> {
        self.sources
            .iter()
            .map(|(source, tags)| {
                let mut all = BTreeSet::new();
                all.extend(tags.low.iter().cloned());
                all.extend(tags.orchestrator.iter().cloned());
                all.extend(tags.high.iter().cloned());
                (source.clone(), all.into_iter().collect())
            })
            .collect()
    }

    /// Apply the contribution of `info.source`. Returns whether the entity
    /// changed; applying the same info twice only changes it once.
    pub fn apply(&mut self, info: &TagInfo) -> bool {
        let changed = if info.delete_entity {
            self.sources.remove(&info.source).is_some()
        } else {
            let tags = SourceTags::from_info(info);
            if self.sources.get(&info.source) == Some(&tags) {
                false
            } else {
                self.sources.insert(info.source.clone(), tags);
                true
            }
        };
        if changed {
            self.recompute();
        }
        changed
    }

    /// Drop sources whose expiry date has passed. Returns whether anything
    /// was removed.
    pub fn prune(&mut self, now: SystemTime) -> bool {
        let before = self.sources.len();
        self.sources
            .retain(|_, tags| tags.expiry_date.is_none_or(|expiry| expiry > now));
        let changed = self.sources.len() != before;
        if changed {
            self.recompute();
        }
        changed
    }

    fn recompute(&mut self) {
        let mut low = BTreeSet::new();
        let mut orchestrator = BTreeSet::new();
        let mut high = BTreeSet::new();
        let mut standard = BTreeSet::new();
        let mut parent = None;

        for tags in self.sources.values() {
            low.extend(tags.low.iter().cloned());
            orchestrator.extend(tags.orchestrator.iter().cloned());
            high.extend(tags.high.iter().cloned());
            standard.extend(tags.standard.iter().cloned());
            if parent.is_none() {
                parent = tags.parent.clone();
            }
        }

        orchestrator.extend(low.iter().cloned());
        high.extend(orchestrator.iter().cloned());

        self.low = low.into_iter().collect();
        self.orchestrator = orchestrator.into_iter().collect();
        self.high = high.into_iter().collect();
        self.standard = standard.into_iter().collect();
        self.parent = parent;
        self.revision += 1;
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn info(source: &str, low: &[&str], orch: &[&str], high: &[&str]) -> TagInfo {
        TagInfo {
            low_card_tags: low.iter().map(|s| s.to_string()).collect(),
            orchestrator_card_tags: orch.iter().map(|s| s.to_string()).collect(),
            high_card_tags: high.iter().map(|s| s.to_string()).collect(),
            ..TagInfo::new(source, EntityId::container("abc"))
        }
    }

    #[test]
    fn test_cardinality_supersets() {
        let mut entity = EntityTags::new(EntityId::container("abc"));
        entity.apply(&info("a", &["b:1", "a:1"], &["pod_name:x"], &["container_id:abc"]));
        entity.apply(&info("b", &["a:1", "c:3"], &[], &["container_name:web"]));

        assert_eq!(entity.get(TagCardinality::Low), &["a:1", "b:1", "c:3"]);
        assert_eq!(
            entity.get(TagCardinality::Orchestrator),
            &["a:1", "b:1", "c:3", "pod_name:x"]
        );
        assert_eq!(
            entity.get(TagCardinality::High),
            &[
                "a:1",
                "b:1",
                "c:3",
                "container_id:abc",
                "container_name:web",
                "pod_name:x"
            ]
        );
        assert_eq!(entity.get(TagCardinality::None), entity.get(TagCardinality::Low));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut entity = EntityTags::new(EntityId::container("abc"));
        let i = info("a", &["a:1"], &[], &[]);
        assert!(entity.apply(&i));
        let revision = entity.revision();
        let tags = entity.get(TagCardinality::High).to_vec();

        assert!(!entity.apply(&i));
        assert_eq!(entity.revision(), revision);
        assert_eq!(entity.get(TagCardinality::High), tags.as_slice());
    }

    #[test]
    fn test_delete_source() {
        let mut entity = EntityTags::new(EntityId::container("abc"));
        entity.apply(&info("a", &["a:1"], &[], &[]));
        entity.apply(&info("b", &["b:1"], &[], &[]));

        assert!(entity.apply(&TagInfo::deletion("a", EntityId::container("abc"))));
        assert_eq!(entity.get(TagCardinality::Low), &["b:1"]);
        assert!(!entity.apply(&TagInfo::deletion("a", EntityId::container("abc"))));

        entity.apply(&TagInfo::deletion("b", EntityId::container("abc")));
        assert!(entity.is_empty());
        assert!(entity.get(TagCardinality::High).is_empty());
    }

    #[test]
    fn test_prune_expired_sources() {
        let now = SystemTime::now();
        let mut entity = EntityTags::new(EntityId::container("abc"));
        entity.apply(&TagInfo {
            expiry_date: Some(now - Duration::from_secs(1)),
            ..info("expired", &["old:1"], &[], &[])
        });
        entity.apply(&TagInfo {
            expiry_date: Some(now + Duration::from_secs(60)),
            ..info("fresh", &["new:1"], &[], &[])
        });
        entity.apply(&info("forever", &["kept:1"], &[], &[]));

        assert!(entity.prune(now));
        assert_eq!(entity.get(TagCardinality::Low), &["kept:1", "new:1"]);
        assert!(!entity.prune(now));
    }

    #[test]
    fn test_parent_and_standard() {
        let mut entity = EntityTags::new(EntityId::container("abc"));
        entity.apply(&TagInfo {
            parent: Some(EntityId::pod("pod-1")),
            standard_tags: vec!["service:web".to_string(), "env:prod".to_string()],
            ..info("pod", &["env:prod", "service:web"], &[], &[])
        });

        assert_eq!(entity.parent(), Some(&EntityId::pod("pod-1")));
        assert_eq!(entity.standard(), &["env:prod", "service:web"]);
        assert_eq!(entity.standard_tags().service.as_deref(), Some("web"));

        let by_source = entity.tags_by_source();
        assert_eq!(by_source["pod"], vec!["env:prod", "service:web"]);
    }

    fn tag_info() -> impl Strategy<Value = TagInfo> {
        let tags = || prop::collection::vec("[a-d]:[0-3]", 0..6);
        ("[a-c]", tags(), tags(), tags(), any::<bool>()).prop_map(
            |(source, low, orchestrator, high, delete)| {
                if delete {
                    return TagInfo::deletion(&source, EntityId::container("abc"));
                }
                TagInfo {
                    low_card_tags: low,
                    orchestrator_card_tags: orchestrator,
                    high_card_tags: high,
                    ..TagInfo::new(&source, EntityId::container("abc"))
                }
            },
        )
    }

    fn is_subset(small: &[String], big: &[String]) -> bool {
        small.iter().all(|tag| big.binary_search(tag).is_ok())
    }

    proptest! {
        #[test]
        fn prop_reapplying_is_a_noop(infos in prop::collection::vec(tag_info(), 1..12)) {
            let mut entity = EntityTags::new(EntityId::container("abc"));
            for info in &infos {
                entity.apply(info);
            }
            let revision = entity.revision();
            let high = entity.get(TagCardinality::High).to_vec();

            if let Some(last) = infos.last() {
                prop_assert!(!entity.apply(last));
            }
            prop_assert_eq!(entity.revision(), revision);
            prop_assert_eq!(entity.get(TagCardinality::High), high.as_slice());
        }

        #[test]
        fn prop_cardinalities_are_nested(infos in prop::collection::vec(tag_info(), 1..12)) {
            let mut entity = EntityTags::new(EntityId::container("abc"));
            for info in &infos {
                entity.apply(info);
            }
            let low = entity.get(TagCardinality::Low);
            let orchestrator = entity.get(TagCardinality::Orchestrator);
            let high = entity.get(TagCardinality::High);

            for tags in [low, orchestrator, high] {
                prop_assert!(tags.windows(2).all(|w| w[0] < w[1]));
            }
            prop_assert!(is_subset(low, orchestrator));
            prop_assert!(is_subset(orchestrator, high));
            for tags in entity.tags_by_source().values() {
                prop_assert!(is_subset(tags, high));
            }
        }

        #[test]
        fn prop_source_order_does_not_matter(infos in prop::collection::vec(tag_info(), 1..8)) {
            // Keep the last contribution of each source, as the store would.
            let mut latest: BTreeMap<String, TagInfo> = BTreeMap::new();
            for info in infos.into_iter().filter(|i| !i.delete_entity) {
                latest.insert(info.source.clone(), info);
            }
            let mut forward = EntityTags::new(EntityId::container("abc"));
            let mut backward = EntityTags::new(EntityId::container("abc"));
            for info in latest.values() {
                forward.apply(info);
            }
            for info in latest.values().rev() {
                backward.apply(info);
            }

            let cardinalities =
                [TagCardinality::Low, TagCardinality::Orchestrator, TagCardinality::High];
            for cardinality in cardinalities {
                prop_assert_eq!(forward.get(cardinality), backward.get(cardinality));
            }
        }
    }
}
