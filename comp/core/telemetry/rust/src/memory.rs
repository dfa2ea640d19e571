// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! A [`metrics::Recorder`] keeping every emission in memory, for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata,
    Recorder, SharedString, Unit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    Count,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric_type: MetricType,
    pub name: String,
    /// Increment for counts, current value for gauges, observation for
    /// histograms.
    pub value: f64,
    /// Sorted so that lookups do not depend on emission order.
    pub labels: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct State {
    samples: Vec<Sample>,
    gauges: HashMap<Key, f64>,
}

/// Keeps every emitted sample in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    state: Arc<Mutex<State>>,
}

fn sorted_labels(labels: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut labels: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    labels.sort();
    labels
}

fn key_labels(key: &Key) -> Vec<(String, String)> {
    let mut labels: Vec<(String, String)> = key
        .labels()
        .map(|label| (label.key().to_string(), label.value().to_string()))
        .collect();
    labels.sort();
    labels
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, metric_type: MetricType, key: &Key, value: f64) {
        self.state().samples.push(Sample {
            metric_type,
            name: key.name().to_string(),
            value,
            labels: key_labels(key),
        });
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.state().samples.clone()
    }

    fn sum(&self, metric_type: MetricType, name: &str, labels: Option<&[(&str, &str)]>) -> f64 {
        let labels = labels.map(sorted_labels);
        self.state()
            .samples
            .iter()
            .filter(|s| s.metric_type == metric_type && s.name == name)
            .filter(|s| labels.as_ref().is_none_or(|l| &s.labels == l))
            .map(|s| s.value)
            .sum()
    }

    /// Sum of the increments of counter `name` carrying exactly `labels`.
    pub fn count_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.sum(MetricType::Count, name, Some(labels)) as u64
    }

    /// Sum of the increments of counter `name`, whatever its labels.
    pub fn count_total(&self, name: &str) -> u64 {
        self.sum(MetricType::Count, name, None) as u64
    }

    /// Current value of gauge `name` with exactly `labels`.
    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let labels = sorted_labels(labels);
        self.state()
            .samples
            .iter()
            .rev()
            .find(|s| s.metric_type == MetricType::Gauge && s.name == name && s.labels == labels)
            .map(|s| s.value)
    }

    pub fn histogram_values(&self, name: &str) -> Vec<f64> {
        self.state()
            .samples
            .iter()
            .filter(|s| s.metric_type == MetricType::Histogram && s.name == name)
            .map(|s| s.value)
            .collect()
    }

    pub fn reset(&self) {
        let mut state = self.state();
        state.samples.clear();
        state.gauges.clear();
    }
}

struct MemoryCounter {
    key: Key,
    recorder: MemoryRecorder,
}

impl CounterFn for MemoryCounter {
    fn increment(&self, value: u64) {
        self.recorder.push(MetricType::Count, &self.key, value as f64);
    }

    fn absolute(&self, value: u64) {
        let current = self.recorder.count_value_for(&self.key);
        self.recorder
            .push(MetricType::Count, &self.key, value as f64 - current);
    }
}

struct MemoryGauge {
    key: Key,
    recorder: MemoryRecorder,
}

impl MemoryGauge {
    fn update(&self, f: impl FnOnce(f64) -> f64) {
        let value = {
            let mut state = self.recorder.state();
            let slot = state.gauges.entry(self.key.clone()).or_insert(0.0);
            *slot = f(*slot);
            *slot
        };
        self.recorder.push(MetricType::Gauge, &self.key, value);
    }
}

impl GaugeFn for MemoryGauge {
    fn increment(&self, value: f64) {
        self.update(|current| current + value);
    }

    fn decrement(&self, value: f64) {
        self.update(|current| current - value);
    }

    fn set(&self, value: f64) {
        self.update(|_| value);
    }
}

struct MemoryHistogram {
    key: Key,
    recorder: MemoryRecorder,
}

impl HistogramFn for MemoryHistogram {
    fn record(&self, value: f64) {
        self.recorder.push(MetricType::Histogram, &self.key, value);
    }
}

impl MemoryRecorder {
    fn count_value_for(&self, key: &Key) -> f64 {
        let labels = key_labels(key);
        self.state()
            .samples
            .iter()
            .filter(|s| {
                s.metric_type == MetricType::Count
                    && s.name == key.name()
                    && s.labels == labels
            })
            .map(|s| s.value)
            .sum()
    }
}

impl Recorder for MemoryRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(MemoryCounter {
            key: key.clone(),
            recorder: self.clone(),
        }))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(MemoryGauge {
            key: key.clone(),
            recorder: self.clone(),
        }))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(MemoryHistogram {
            key: key.clone(),
            recorder: self.clone(),
        }))
    }
}
