// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! External metrics API view over the DatadogMetric store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};

use dd_agent_telemetry::Telemetry;
use log::{debug, info, warn};
use tokio::sync::watch;

use crate::errors::ProviderError;
use crate::model::{DatadogMetricInternal, metric_name_to_id};
use crate::retriever::MetricsRetriever;
use crate::selector::LabelSelector;
use crate::store::DatadogMetricsStore;

pub const API_REQUESTS_METRIC: &str = "external_metrics.api_requests";
pub const API_ELAPSED_METRIC: &str = "external_metrics.api_elapsed";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExternalMetricInfo {
    pub metric: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalMetricValue {
    pub metric_name: String,
    pub metric_labels: BTreeMap<String, String>,
    pub value: f64,
    pub timestamp: SystemTime,
}

pub struct DatadogMetricProvider {
    store: Arc<DatadogMetricsStore>,
    retriever: Arc<MetricsRetriever>,
    telemetry: Telemetry,
    local: RwLock<Vec<DatadogMetricInternal>>,
}

impl DatadogMetricProvider {
    pub fn new(
        store: Arc<DatadogMetricsStore>,
        retriever: Arc<MetricsRetriever>,
        telemetry: Telemetry,
    ) -> Self {
        let provider = Self {
            store,
            retriever,
            telemetry,
            local: RwLock::new(Vec::new()),
        };
        provider.refresh();
        provider
    }

    /// Copy the active metrics from the store.
    pub fn refresh(&self) {
        let metrics = self.store.get_filtered(|m| m.active);
        debug!("external metrics provider refreshed with {} metrics", metrics.len());
        *self
            .local
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = metrics;
    }

    /// Refresh the local copy every refresh period until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.retriever.config().refresh_period();
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("stopped external metrics provider refresh");
                    return;
                }
                _ = ticker.tick() => self.refresh(),
            }
        }
    }

    /// False once the upstream API has been unreachable for more than twice
    /// the max age.
    pub fn is_serving(&self, now: SystemTime) -> bool {
        let limit = self
            .retriever
            .config()
            .global_max_age()
            .checked_mul(2)
            .unwrap_or(Duration::MAX);
        now.duration_since(self.retriever.last_successful_api_call())
            .map(|elapsed| elapsed <= limit)
            .unwrap_or(true)
    }

    pub fn get_external_metric(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        info: &ExternalMetricInfo,
    ) -> Result<Vec<ExternalMetricValue>, ProviderError> {
        self.get_external_metric_at(namespace, selector, info, SystemTime::now())
    }

    pub fn get_external_metric_at(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        info: &ExternalMetricInfo,
        now: SystemTime,
    ) -> Result<Vec<ExternalMetricValue>, ProviderError> {
        let start = Instant::now();
        let result = self.lookup(namespace, selector, info, now);
        let status = if result.is_ok() { "success" } else { "error" };
        self.telemetry.count(
            API_REQUESTS_METRIC,
            1,
            &[("handler", "get"), ("status", status)],
        );
        self.telemetry.histogram(
            API_ELAPSED_METRIC,
            start.elapsed().as_secs_f64(),
            &[("handler", "get")],
        );
        if let Err(e) = &result {
            warn!("external metric query failed: {e}");
        }
        result
    }

    fn lookup(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        info: &ExternalMetricInfo,
        now: SystemTime,
    ) -> Result<Vec<ExternalMetricValue>, ProviderError> {
        let metric = info.metric.to_lowercase();
        debug!("external metric query: namespace={namespace} selector={selector:?} metric={metric}");

        if !self.is_serving(now) {
            return Err(ProviderError::ExternalMetricsInvalid);
        }

        let local = self
            .local
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let candidates: Vec<&DatadogMetricInternal> = match metric_name_to_id(&metric) {
            Some(Ok(id)) => local.iter().filter(|m| m.id.to_lowercase() == id).collect(),
            Some(Err(())) => {
                return Err(ProviderError::Invalid {
                    id: metric,
                    reason: "name does not follow datadogmetric@<namespace>:<name>".to_string(),
                });
            }
            None => local
                .iter()
                .filter(|m| m.matches_external_name(&metric) && selector.matches(&m.labels))
                .collect(),
        };

        if candidates.is_empty() {
            return Err(ProviderError::NotFound(metric));
        }

        let values: Vec<ExternalMetricValue> = candidates
            .iter()
            .filter(|m| m.valid)
            .map(|m| ExternalMetricValue {
                metric_name: metric.clone(),
                metric_labels: m.labels.clone(),
                value: m.value,
                timestamp: m.data_time.unwrap_or(now),
            })
            .collect();

        if values.is_empty() {
            let first = candidates.first().map(|m| (m.id.clone(), m.error.clone()));
            let (id, error) = first.unwrap_or_default();
            return Err(ProviderError::Invalid {
                id,
                reason: error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no valid value yet".to_string()),
            });
        }
        Ok(values)
    }

    /// One entry per distinct external metric name, lowercased.
    pub fn list_all_external_metrics(&self) -> Vec<ExternalMetricInfo> {
        let local = self
            .local
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names = BTreeSet::new();
        for metric in local.iter() {
            names.insert(metric.external_metric_name().to_lowercase());
            if !metric.external_metric_name.is_empty() {
                names.insert(metric.external_metric_name.to_lowercase());
            }
        }
        names
            .into_iter()
            .map(|metric| ExternalMetricInfo { metric })
            .collect()
    }
}
