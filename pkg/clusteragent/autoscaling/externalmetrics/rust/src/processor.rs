// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Upstream metrics API client seam.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failure of a whole batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("rate limit exceeded (429)")]
    RateLimited,
    #[error("transient error{}: {message}", status_suffix(.status))]
    Transient { status: Option<u16>, message: String },
    #[error("{0}")]
    Other(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl ProcessorError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProcessorError::RateLimited)
    }
}

/// Latest point returned for one query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Point {
    pub value: f64,
    /// Unix epoch, seconds.
    pub timestamp: i64,
    pub valid: bool,
    /// Set when the backend rejected this query only.
    pub error: Option<String>,
}

impl Point {
    pub fn valid(value: f64, timestamp: i64) -> Self {
        Self {
            value,
            timestamp,
            valid: true,
            error: None,
        }
    }

    pub fn failed(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Processor: Send + Sync {
    /// Run `queries` over `time_window` in one upstream call. Queries with
    /// no data are absent from the result.
    async fn query_external_metric(
        &self,
        queries: &[String],
        time_window: Duration,
    ) -> Result<HashMap<String, Point>, ProcessorError>;
}
