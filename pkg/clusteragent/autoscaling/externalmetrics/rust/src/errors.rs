// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use thiserror::Error;

/// Errors returned to external metrics API callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("external metrics are invalid: the provider is not serving")]
    ExternalMetricsInvalid,
    #[error("external metric {0} not found")]
    NotFound(String),
    #[error("invalid label selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("DatadogMetric {id} is invalid: {reason}")]
    Invalid { id: String, reason: String },
}
