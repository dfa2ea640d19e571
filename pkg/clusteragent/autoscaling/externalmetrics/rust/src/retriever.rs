// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dd_agent_telemetry::Telemetry;
use log::{debug, info, trace, warn};
use tokio::sync::watch;

use crate::backoff::{increment_retries, reset_retries};
use crate::config::ExternalMetricsConfig;
use crate::model::{DatadogMetricInternal, MetricError};
use crate::processor::{Point, Processor, ProcessorError};
use crate::store::DatadogMetricsStore;

pub const BATCHES_METRIC: &str = "external_metrics.retriever.batches";
pub const QUERIES_METRIC: &str = "external_metrics.retriever.queries";

/// Returns whether this replica is allowed to refresh metrics.
pub type LeaderCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Periodically refreshes the values of active DatadogMetrics.
pub struct MetricsRetriever {
    config: ExternalMetricsConfig,
    processor: Arc<dyn Processor>,
    store: Arc<DatadogMetricsStore>,
    telemetry: Telemetry,
    is_leader: Option<LeaderCheck>,
    last_successful_api_call: RwLock<SystemTime>,
}

impl MetricsRetriever {
    pub fn new(
        config: ExternalMetricsConfig,
        processor: Arc<dyn Processor>,
        store: Arc<DatadogMetricsStore>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            config,
            processor,
            store,
            telemetry,
            is_leader: None,
            last_successful_api_call: RwLock::new(SystemTime::now()),
        }
    }

    /// Only refresh metrics while `is_leader` returns true.
    pub fn with_leader_check(mut self, is_leader: LeaderCheck) -> Self {
        self.is_leader = Some(is_leader);
        self
    }

    pub fn config(&self) -> &ExternalMetricsConfig {
        &self.config
    }

    /// Last time a batch went through without a batch-level error. Starts
    /// at creation time.
    pub fn last_successful_api_call(&self) -> SystemTime {
        *self
            .last_successful_api_call
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mark_api_success(&self, now: SystemTime) {
        let mut last = self
            .last_successful_api_call
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if now > *last {
            *last = now;
        }
    }

    /// Refresh every `refresh_period` until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.refresh_period();
        info!("starting external metrics retriever (every {period:?})");
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("stopped external metrics retriever");
                    return;
                }
                _ = ticker.tick() => {
                    if self.is_leader.as_ref().is_none_or(|is_leader| is_leader()) {
                        self.retrieve_metrics().await;
                    } else {
                        trace!("not leader, skipping external metrics refresh");
                    }
                }
            }
        }
    }

    pub async fn retrieve_metrics(&self) {
        self.retrieve_metrics_at(SystemTime::now()).await;
    }

    /// One retrieval pass, as if it ran at `now`.
    pub async fn retrieve_metrics_at(&self, now: SystemTime) {
        let due = self.store.get_filtered(|m| m.active && m.is_due(now));
        if due.is_empty() {
            debug!("no active DatadogMetric due for refresh");
            return;
        }

        for (window, metrics) in group_by_time_window(due, self.config.default_time_window()) {
            if !self.config.split_batches_with_backoff {
                self.retrieve_batch(&metrics, window, now).await;
                continue;
            }

            let (isolated, batched): (Vec<_>, Vec<_>) = metrics
                .into_iter()
                .partition(|m| m.error.as_ref().is_some_and(MetricError::isolates_query));
            if !batched.is_empty() {
                self.retrieve_batch(&batched, window, now).await;
            }
            for metric in isolated {
                debug!("querying DatadogMetric {} alone after error", metric.id);
                self.retrieve_batch(std::slice::from_ref(&metric), window, now)
                    .await;
            }
        }
    }

    async fn retrieve_batch(
        &self,
        metrics: &[DatadogMetricInternal],
        window: Duration,
        now: SystemTime,
    ) {
        let queries = unique_queries(metrics);
        debug!(
            "querying {} external metrics over {window:?} ({} DatadogMetrics)",
            queries.len(),
            metrics.len()
        );
        self.telemetry
            .count(QUERIES_METRIC, queries.len() as u64, &[]);

        let result = tokio::time::timeout(
            self.config.query_timeout(),
            self.processor.query_external_metric(&queries, window),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ProcessorError::Transient {
                status: None,
                message: "query timed out".to_string(),
            })
        });

        match result {
            Ok(points) => {
                self.telemetry.count(BATCHES_METRIC, 1, &[("status", "ok")]);
                self.mark_api_success(now);
                for metric in metrics {
                    self.apply_point(metric, points.get(&metric.query), now);
                }
            }
            Err(cause) => {
                let status = if cause.is_rate_limited() {
                    "rate_limited"
                } else {
                    "error"
                };
                self.telemetry.count(BATCHES_METRIC, 1, &[("status", status)]);
                warn!(
                    "unable to fetch external metrics for {} queries: {cause}",
                    queries.len()
                );
                for metric in metrics {
                    self.update_if_unchanged(metric, |stored| {
                        stored.valid = false;
                        stored.update_time = Some(now);
                        stored.error = Some(MetricError::Batch {
                            cause: cause.clone(),
                            at: now,
                        });
                        if !cause.is_rate_limited() {
                            increment_retries(stored, now);
                        }
                    });
                }
            }
        }
    }

    fn apply_point(&self, metric: &DatadogMetricInternal, point: Option<&Point>, now: SystemTime) {
        let max_age = if metric.max_age.is_zero() {
            self.config.global_max_age()
        } else {
            metric.max_age
        };

        self.update_if_unchanged(metric, |stored| {
            stored.update_time = Some(now);
            let Some(point) = point else {
                debug!("no result for query {}", stored.query);
                stored.valid = false;
                stored.error = Some(MetricError::MissingResult {
                    query: stored.query.clone(),
                });
                return;
            };

            if point.error.is_some() || !point.valid {
                let message = point
                    .error
                    .clone()
                    .unwrap_or_else(|| "invalid point returned".to_string());
                debug!("query {} failed: {message}", stored.query);
                stored.valid = false;
                stored.error = Some(MetricError::Query {
                    query: stored.query.clone(),
                    message,
                    at: now,
                });
                increment_retries(stored, now);
                return;
            }

            let data_time = point_time(point.timestamp);
            stored.value = point.value;
            stored.data_time = Some(data_time);
            let age = now.duration_since(data_time).unwrap_or_default();
            if age > max_age {
                debug!(
                    "query {} returned a point {age:?} old (max {max_age:?})",
                    stored.query
                );
                stored.valid = false;
                stored.error = Some(MetricError::Outdated {
                    query: stored.query.clone(),
                });
            } else {
                stored.valid = true;
                stored.error = None;
                reset_retries(stored);
            }
        });
    }

    /// Skip metrics whose query changed while the batch was in flight.
    fn update_if_unchanged<F>(&self, metric: &DatadogMetricInternal, update: F)
    where
        F: FnOnce(&mut DatadogMetricInternal),
    {
        let found = self.store.update(&metric.id, |stored| {
            if stored.query == metric.query {
                update(stored);
            } else {
                debug!("query of DatadogMetric {} changed, dropping result", stored.id);
            }
        });
        if !found {
            debug!("DatadogMetric {} was deleted during retrieval", metric.id);
        }
    }
}

fn point_time(timestamp: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(u64::try_from(timestamp).unwrap_or_default())
}

/// Group metrics by effective query window.
///
/// Windows longer than `default_window` get their own group; shorter ones
/// join the default group.
pub fn group_by_time_window(
    metrics: Vec<DatadogMetricInternal>,
    default_window: Duration,
) -> BTreeMap<Duration, Vec<DatadogMetricInternal>> {
    let mut groups: BTreeMap<Duration, Vec<DatadogMetricInternal>> = BTreeMap::new();
    for metric in metrics {
        groups
            .entry(metric.effective_window(default_window))
            .or_default()
            .push(metric);
    }
    groups
}

/// Queries of `metrics`, deduplicated, in first-seen order.
pub fn unique_queries(metrics: &[DatadogMetricInternal]) -> Vec<String> {
    let mut seen = HashSet::new();
    metrics
        .iter()
        .filter(|m| seen.insert(m.query.as_str()))
        .map(|m| m.query.clone())
        .collect()
}

/// Unique queries per time window, as they would be batched without error
/// isolation.
pub fn batched_queries_by_time_window(
    metrics: Vec<DatadogMetricInternal>,
    default_window: Duration,
) -> HashMap<Duration, Vec<String>> {
    group_by_time_window(metrics, default_window)
        .into_iter()
        .map(|(window, metrics)| (window, unique_queries(&metrics)))
        .collect()
}
