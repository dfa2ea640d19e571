// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Pathtest store: one context per fingerprint, kept alive while the
//! connection keeps showing up and handed to the workers at most once per
//! run interval.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use dd_agent_log::LogLimit;
use dd_agent_telemetry::Telemetry;
use log::{debug, warn};
use tokio::time::Instant;

use crate::metrics;
use crate::pathtest::Pathtest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum number of fingerprints tracked at once.
    pub contexts_limit: usize,
    /// How long a fingerprint stays alive after it was last seen.
    pub ttl: Duration,
    /// Minimum time between two runs of the same fingerprint.
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathtestContext {
    pub pathtest: Pathtest,
    next_run_time: Option<Instant>,
    run_until: Instant,
    last_flush_time: Option<Instant>,
    last_flush_interval: Duration,
}

impl PathtestContext {
    fn new(pathtest: Pathtest, run_until: Instant) -> Self {
        Self {
            pathtest,
            next_run_time: None,
            run_until,
            last_flush_time: None,
            last_flush_interval: Duration::ZERO,
        }
    }

    /// Time between the two most recent flushes of this context, zero on
    /// its first run.
    pub fn last_flush_interval(&self) -> Duration {
        self.last_flush_interval
    }
}

pub struct PathtestStore {
    config: StoreConfig,
    contexts: Mutex<HashMap<u64, PathtestContext>>,
    telemetry: Telemetry,
    limit_log: LogLimit,
}

impl PathtestStore {
    pub fn new(config: StoreConfig, telemetry: Telemetry) -> Self {
        Self {
            config,
            contexts: Mutex::new(HashMap::new()),
            telemetry,
            limit_log: LogLimit::new(10, Duration::from_secs(5 * 60)),
        }
    }

    fn contexts(&self) -> MutexGuard<'_, HashMap<u64, PathtestContext>> {
        self.contexts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track `pathtest`, or keep its existing context alive for another TTL.
    pub fn add(&self, pathtest: Pathtest, now: Instant) {
        let run_until = now + self.config.ttl;
        let fingerprint = pathtest.fingerprint();
        let mut contexts = self.contexts();
        if let Some(context) = contexts.get_mut(&fingerprint) {
            context.run_until = run_until;
            return;
        }
        if contexts.len() >= self.config.contexts_limit {
            self.telemetry.count(
                &metrics::name("pathtest_store.dropped"),
                1,
                &[("reason", "too_many_contexts")],
            );
            if self.limit_log.should_log() {
                warn!(
                    "pathtest store is full ({} contexts), dropping pathtest to {}:{}",
                    self.config.contexts_limit, pathtest.hostname, pathtest.port
                );
            }
            return;
        }
        debug!(
            "new pathtest context for {}:{} ({})",
            pathtest.hostname, pathtest.port, pathtest.protocol
        );
        contexts.insert(fingerprint, PathtestContext::new(pathtest, run_until));
    }

    /// Evict expired contexts and return those due for a run.
    pub fn flush(&self, now: Instant) -> Vec<PathtestContext> {
        let interval = self.config.interval;
        let mut contexts = self.contexts();
        let before = contexts.len();
        contexts.retain(|_, context| context.run_until >= now);
        let expired = before.saturating_sub(contexts.len());
        if expired > 0 {
            debug!("evicted {expired} expired pathtest contexts");
        }

        let mut due = Vec::new();
        for context in contexts.values_mut() {
            if context.next_run_time.is_some_and(|next| next > now) {
                continue;
            }
            if let Some(last) = context.last_flush_time {
                context.last_flush_interval = now.saturating_duration_since(last);
            }
            context.last_flush_time = Some(now);
            context.next_run_time = Some(now + interval);
            due.push(context.clone());
        }
        due
    }

    pub fn len(&self) -> usize {
        self.contexts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::payload::Protocol;
    use dd_agent_telemetry::MemoryRecorder;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn pathtest(host: &str, port: u16) -> Pathtest {
        Pathtest {
            hostname: host.to_string(),
            port,
            protocol: Protocol::Tcp,
            ..Default::default()
        }
    }

    fn store(limit: usize) -> (PathtestStore, MemoryRecorder) {
        let telemetry = MemoryRecorder::new();
        let store = PathtestStore::new(
            StoreConfig {
                contexts_limit: limit,
                ttl: Duration::from_secs(60),
                interval: Duration::from_secs(10),
            },
            Telemetry::with_recorder(telemetry.clone()),
        );
        (store, telemetry)
    }

    #[test]
    fn test_one_context_per_fingerprint() {
        let (store, _) = store(100);
        let now = Instant::now();
        for _ in 0..5 {
            store.add(pathtest("1.1.1.1", 443), now);
        }
        store.add(pathtest("1.1.1.1", 80), now);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_contexts_limit() {
        let (store, telemetry) = store(2);
        let now = Instant::now();
        store.add(pathtest("1.1.1.1", 1), now);
        store.add(pathtest("1.1.1.1", 2), now);
        store.add(pathtest("1.1.1.1", 3), now);
        // Known fingerprints are still refreshed when full.
        store.add(pathtest("1.1.1.1", 1), now);
        assert_eq!(store.len(), 2);
        assert_eq!(
            telemetry.count_value(
                "datadog.network_path.collector.pathtest_store.dropped",
                &[("reason", "too_many_contexts")]
            ),
            1
        );
    }

    #[test]
    fn test_flush_respects_interval() {
        let (store, _) = store(100);
        let start = Instant::now();
        store.add(pathtest("1.1.1.1", 443), start);

        let first = store.flush(start);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].last_flush_interval(), Duration::ZERO);

        assert!(store.flush(start + Duration::from_secs(5)).is_empty());

        let again = store.flush(start + Duration::from_secs(12));
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].last_flush_interval(), Duration::from_secs(12));
    }

    #[test]
    fn test_ttl_expiry_and_refresh() {
        let (store, _) = store(100);
        let start = Instant::now();
        store.add(pathtest("1.1.1.1", 443), start);
        store.add(pathtest("2.2.2.2", 443), start);

        // Seen again, so it outlives the other one.
        store.add(pathtest("2.2.2.2", 443), start + Duration::from_secs(50));

        let due = store.flush(start + Duration::from_secs(70));
        assert_eq!(store.len(), 1);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].pathtest.hostname, "2.2.2.2");
    }

    fn pathtests() -> impl Strategy<Value = Vec<Pathtest>> {
        let protocol = prop_oneof![Just(Protocol::Tcp), Just(Protocol::Udp), Just(Protocol::Icmp)];
        prop::collection::vec(
            ("10\\.0\\.0\\.[1-4]", 0u16..4, protocol).prop_map(|(host, port, protocol)| {
                Pathtest {
                    protocol,
                    ..pathtest(&host, port)
                }
            }),
            0..40,
        )
    }

    proptest! {
        #[test]
        fn prop_flush_yields_each_fingerprint_once(
            pathtests in pathtests(),
            limit in 1usize..20,
        ) {
            let (store, telemetry) = store(limit);
            let now = Instant::now();
            let fingerprints: HashSet<u64> = pathtests.iter().map(Pathtest::fingerprint).collect();
            for pathtest in pathtests {
                store.add(pathtest, now);
            }
            prop_assert_eq!(store.len(), fingerprints.len().min(limit));

            let due = store.flush(now);
            let flushed: HashSet<u64> = due.iter().map(|c| c.pathtest.fingerprint()).collect();
            prop_assert_eq!(flushed.len(), due.len());
            prop_assert_eq!(due.len(), store.len());
            prop_assert!(flushed.is_subset(&fingerprints));
            prop_assert!(store.flush(now).is_empty());

            let dropped =
                telemetry.count_total("datadog.network_path.collector.pathtest_store.dropped");
            prop_assert_eq!(dropped == 0, fingerprints.len() <= limit);
        }
    }
}
