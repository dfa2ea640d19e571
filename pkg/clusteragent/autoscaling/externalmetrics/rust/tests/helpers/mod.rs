// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dd_agent_telemetry::{MemoryRecorder, Telemetry};
use dd_externalmetrics::{
    DatadogMetricInternal, DatadogMetricsStore, ExternalMetricsConfig, MetricsRetriever, Point,
    Processor, ProcessorError,
};

// ============================================================================
// Fakes
// ============================================================================

/// Answers with the configured points, or fails the whole batch.
#[derive(Default)]
pub struct FakeProcessor {
    pub points: Mutex<HashMap<String, Point>>,
    pub failure: Mutex<Option<ProcessorError>>,
    pub delay: Duration,
    pub batches: Mutex<Vec<(Vec<String>, Duration)>>,
}

impl FakeProcessor {
    pub fn set_point(&self, query: &str, point: Point) {
        self.points.lock().unwrap().insert(query.to_string(), point);
    }

    pub fn remove_point(&self, query: &str) {
        self.points.lock().unwrap().remove(query);
    }

    pub fn fail_with(&self, failure: Option<ProcessorError>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|(queries, _)| queries.clone())
            .collect()
    }

    pub fn windows(&self) -> Vec<Duration> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|(_, window)| *window)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn clear_calls(&self) {
        self.batches.lock().unwrap().clear();
    }
}

#[async_trait]
impl Processor for FakeProcessor {
    async fn query_external_metric(
        &self,
        queries: &[String],
        time_window: Duration,
    ) -> Result<HashMap<String, Point>, ProcessorError> {
        self.batches
            .lock()
            .unwrap()
            .push((queries.to_vec(), time_window));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(failure) = self.failure.lock().unwrap().clone() {
            return Err(failure);
        }
        let points = self.points.lock().unwrap();
        Ok(queries
            .iter()
            .filter_map(|q| points.get(q).map(|p| (q.clone(), p.clone())))
            .collect())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub store: Arc<DatadogMetricsStore>,
    pub processor: Arc<FakeProcessor>,
    pub retriever: Arc<MetricsRetriever>,
    pub telemetry: MemoryRecorder,
}

pub fn harness() -> Harness {
    harness_with(ExternalMetricsConfig::default(), FakeProcessor::default())
}

pub fn harness_with(config: ExternalMetricsConfig, processor: FakeProcessor) -> Harness {
    let store = Arc::new(DatadogMetricsStore::new());
    let processor = Arc::new(processor);
    let telemetry = MemoryRecorder::new();
    let retriever = Arc::new(MetricsRetriever::new(
        config,
        processor.clone(),
        store.clone(),
        Telemetry::with_recorder(telemetry.clone()),
    ));
    Harness {
        store,
        processor,
        retriever,
        telemetry,
    }
}

impl Harness {
    /// Telemetry handle feeding [`Harness::telemetry`].
    pub fn telemetry_handle(&self) -> Telemetry {
        Telemetry::with_recorder(self.telemetry.clone())
    }

    pub fn add(&self, metric: DatadogMetricInternal) {
        self.store.set(metric, "test");
    }

    pub fn get(&self, id: &str) -> DatadogMetricInternal {
        self.store.get(id).unwrap()
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn metric(id: &str, query: &str) -> DatadogMetricInternal {
    DatadogMetricInternal::new(id, query)
}

/// Unix seconds of `now - ago`.
pub fn unix_secs(now: SystemTime, ago: Duration) -> i64 {
    i64::try_from((now - ago).duration_since(UNIX_EPOCH).unwrap().as_secs()).unwrap()
}

/// `now - ago`, truncated to the second like backend timestamps.
pub fn truncated(now: SystemTime, ago: Duration) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(u64::try_from(unix_secs(now, ago)).unwrap())
}

pub fn fresh_point(value: f64, now: SystemTime) -> Point {
    Point::valid(value, unix_secs(now, Duration::from_secs(1)))
}

pub fn retry_delay(metric: &DatadogMetricInternal, now: SystemTime) -> Duration {
    metric.retry_after.unwrap().duration_since(now).unwrap()
}
