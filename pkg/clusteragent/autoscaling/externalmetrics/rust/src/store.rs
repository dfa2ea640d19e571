// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::trace;

use crate::model::DatadogMetricInternal;

/// DatadogMetrics known to the cluster agent, keyed by `namespace/name`.
#[derive(Debug, Default)]
pub struct DatadogMetricsStore {
    metrics: RwLock<HashMap<String, DatadogMetricInternal>>,
}

impl DatadogMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, DatadogMetricInternal>> {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, DatadogMetricInternal>> {
        self.metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, metric: DatadogMetricInternal, sender: &str) {
        trace!("DatadogMetric {} set by {sender}", metric.id);
        self.write().insert(metric.id.clone(), metric);
    }

    pub fn get(&self, id: &str) -> Option<DatadogMetricInternal> {
        self.read().get(id).cloned()
    }

    pub fn delete(&self, id: &str, sender: &str) -> Option<DatadogMetricInternal> {
        trace!("DatadogMetric {id} deleted by {sender}");
        self.write().remove(id)
    }

    /// Apply `update` to the stored metric atomically with respect to
    /// readers. Returns false if `id` is unknown.
    pub fn update<F>(&self, id: &str, update: F) -> bool
    where
        F: FnOnce(&mut DatadogMetricInternal),
    {
        match self.write().get_mut(id) {
            Some(metric) => {
                update(metric);
                true
            }
            None => false,
        }
    }

    /// Metrics accepted by `filter`, sorted by id.
    pub fn get_filtered<F>(&self, filter: F) -> Vec<DatadogMetricInternal>
    where
        F: Fn(&DatadogMetricInternal) -> bool,
    {
        let mut metrics: Vec<_> = self.read().values().filter(|m| filter(m)).cloned().collect();
        metrics.sort_by(|a, b| a.id.cmp(&b.id));
        metrics
    }

    pub fn get_all(&self) -> Vec<DatadogMetricInternal> {
        self.get_filtered(|_| true)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
