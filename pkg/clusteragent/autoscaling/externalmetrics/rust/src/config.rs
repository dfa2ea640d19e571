// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;

fn default_refresh_period() -> u64 {
    30
}

fn default_max_age() -> u64 {
    120
}

fn default_rollup() -> u64 {
    30
}

fn default_bucket_size() -> u64 {
    5 * 60
}

fn default_query_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// `external_metrics_provider` settings. Every duration is in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalMetricsConfig {
    #[serde(default = "default_refresh_period")]
    pub refresh_period: u64,
    #[serde(default = "default_max_age")]
    pub max_age: u64,
    #[serde(default = "default_rollup")]
    pub rollup: u64,
    /// Default query window.
    #[serde(default = "default_bucket_size")]
    pub bucket_size: u64,
    #[serde(default = "default_query_timeout")]
    pub query_timeout: u64,
    #[serde(default = "default_true")]
    pub split_batches_with_backoff: bool,
}

impl Default for ExternalMetricsConfig {
    fn default() -> Self {
        Self {
            refresh_period: default_refresh_period(),
            max_age: default_max_age(),
            rollup: default_rollup(),
            bucket_size: default_bucket_size(),
            query_timeout: default_query_timeout(),
            split_batches_with_backoff: true,
        }
    }
}

fn override_parsed<T: FromStr>(key: &str, slot: &mut T)
where
    T::Err: std::fmt::Display,
{
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.trim().to_lowercase().parse() {
        Ok(value) => *slot = value,
        Err(e) => warn!("ignoring invalid {key}={raw:?}: {e}"),
    }
}

impl ExternalMetricsConfig {
    /// Apply the `DD_EXTERNAL_METRICS_PROVIDER_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        override_parsed(
            "DD_EXTERNAL_METRICS_PROVIDER_REFRESH_PERIOD",
            &mut self.refresh_period,
        );
        override_parsed("DD_EXTERNAL_METRICS_PROVIDER_MAX_AGE", &mut self.max_age);
        override_parsed("DD_EXTERNAL_METRICS_PROVIDER_ROLLUP", &mut self.rollup);
        override_parsed(
            "DD_EXTERNAL_METRICS_PROVIDER_BUCKET_SIZE",
            &mut self.bucket_size,
        );
        override_parsed(
            "DD_EXTERNAL_METRICS_PROVIDER_SPLIT_BATCHES_WITH_BACKOFF",
            &mut self.split_batches_with_backoff,
        );
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_period.max(1))
    }

    /// Results older than this are outdated, unless a metric sets its own.
    pub fn global_max_age(&self) -> Duration {
        Duration::from_secs(self.max_age.max(self.rollup.saturating_mul(3)))
    }

    pub fn default_time_window(&self) -> Duration {
        Duration::from_secs(self.bucket_size)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout.max(1))
    }
}

/// Load the provider configuration from a YAML file, then apply
/// environment overrides. A missing or empty file yields the defaults.
pub fn load_config(path: &Path) -> Result<ExternalMetricsConfig> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        if contents.trim().is_empty() {
            ExternalMetricsConfig::default()
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        }
    } else {
        ExternalMetricsConfig::default()
    };
    config.apply_env_overrides();
    Ok(config)
}
