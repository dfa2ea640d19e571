// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use thiserror::Error;

use crate::processor::ProcessorError;

pub const DATADOG_METRIC_PREFIX: &str = "datadogmetric@";
const NAMESPACE_SEPARATOR: char = '/';
const EXTERNAL_NAME_SEPARATOR: char = ':';

/// Why a metric currently has no usable value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricError {
    #[error("query returned outdated result: {query}")]
    Outdated { query: String },
    #[error("query did not return any result: {query}")]
    MissingResult { query: String },
    #[error("error from backend while processing query {query}: {message}")]
    Query {
        query: String,
        message: String,
        at: SystemTime,
    },
    #[error("processing batch failed: {cause}")]
    Batch {
        cause: ProcessorError,
        at: SystemTime,
    },
}

impl MetricError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, MetricError::Batch { cause, .. } if cause.is_rate_limited())
    }

    /// Errors that make the metric query alone until it recovers.
    pub fn isolates_query(&self) -> bool {
        match self {
            MetricError::Query { .. } => true,
            MetricError::Batch { cause, .. } => !cause.is_rate_limited(),
            MetricError::Outdated { .. } | MetricError::MissingResult { .. } => false,
        }
    }
}

/// In-memory state of a DatadogMetric.
#[derive(Debug, Clone, PartialEq)]
pub struct DatadogMetricInternal {
    /// `namespace/name`
    pub id: String,
    pub query: String,
    pub active: bool,
    pub valid: bool,
    /// Created by the agent from a plain metric name rather than by a user.
    pub autogen: bool,
    /// Plain metric name autoscalers may refer to, when autogenerated.
    pub external_metric_name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    pub data_time: Option<SystemTime>,
    pub update_time: Option<SystemTime>,
    pub error: Option<MetricError>,
    pub retries: u32,
    pub retry_after: Option<SystemTime>,
    /// Zero means the global max age.
    pub max_age: Duration,
    /// Zero means the default window.
    pub time_window: Duration,
}

impl DatadogMetricInternal {
    pub fn new(id: &str, query: &str) -> Self {
        Self {
            id: id.to_string(),
            query: query.to_string(),
            active: true,
            valid: false,
            autogen: false,
            external_metric_name: String::new(),
            labels: BTreeMap::new(),
            value: 0.0,
            data_time: None,
            update_time: None,
            error: None,
            retries: 0,
            retry_after: None,
            max_age: Duration::ZERO,
            time_window: Duration::ZERO,
        }
    }

    pub fn namespace(&self) -> &str {
        self.id
            .split_once(NAMESPACE_SEPARATOR)
            .map(|(ns, _)| ns)
            .unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.id
            .split_once(NAMESPACE_SEPARATOR)
            .map(|(_, name)| name)
            .unwrap_or(&self.id)
    }

    /// `datadogmetric@<namespace>:<name>`
    pub fn external_metric_name(&self) -> String {
        format!(
            "{DATADOG_METRIC_PREFIX}{}{EXTERNAL_NAME_SEPARATOR}{}",
            self.namespace(),
            self.name()
        )
    }

    /// Whether autoscalers referring to `metric` (lowercased) are served by
    /// this DatadogMetric.
    pub fn matches_external_name(&self, metric: &str) -> bool {
        self.external_metric_name() == metric
            || (!self.external_metric_name.is_empty()
                && self.external_metric_name.to_lowercase() == metric)
    }

    /// Whether the metric should be part of the next retrieval.
    pub fn is_due(&self, now: SystemTime) -> bool {
        self.retries == 0 || self.retry_after.is_none_or(|after| now >= after)
    }

    pub(crate) fn effective_window(&self, default_window: Duration) -> Duration {
        if self.time_window > default_window {
            self.time_window
        } else {
            default_window
        }
    }
}

/// Parse `datadogmetric@<namespace>:<name>` into a store id.
///
/// Returns `None` when the prefix is absent and `Some(Err(()))` when the
/// prefix is present but the rest is malformed.
pub fn metric_name_to_id(metric: &str) -> Option<Result<String, ()>> {
    let rest = metric.strip_prefix(DATADOG_METRIC_PREFIX)?;
    Some(match rest.split_once(EXTERNAL_NAME_SEPARATOR) {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
            Ok(format!("{ns}{NAMESPACE_SEPARATOR}{name}"))
        }
        _ => Err(()),
    })
}
