// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;

use crate::payload::TcpMethod;
use crate::store::StoreConfig;

fn default_workers() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_max_ttl() -> u8 {
    30
}

fn default_chan_size() -> usize {
    1000
}

fn default_contexts_limit() -> usize {
    5000
}

fn default_pathtest_ttl_secs() -> u64 {
    35 * 60
}

fn default_pathtest_interval_secs() -> u64 {
    5 * 60
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_reverse_dns_timeout_ms() -> u64 {
    5000
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Network path collector settings.
///
/// Durations are in seconds, except `timeout` and `reverse_dns_timeout`
/// which are in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub connections_monitoring_enabled: bool,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Per-hop traceroute timeout, milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    #[serde(default = "default_max_ttl")]
    pub max_ttl: u8,
    #[serde(default = "default_chan_size")]
    pub input_chan_size: usize,
    #[serde(default = "default_chan_size")]
    pub processing_chan_size: usize,
    #[serde(default = "default_contexts_limit")]
    pub pathtest_contexts_limit: usize,
    #[serde(default = "default_pathtest_ttl_secs")]
    pub pathtest_ttl: u64,
    #[serde(default = "default_pathtest_interval_secs")]
    pub pathtest_interval: u64,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval: u64,
    #[serde(default = "default_true")]
    pub reverse_dns_enrichment_enabled: bool,
    #[serde(default = "default_reverse_dns_timeout_ms")]
    pub reverse_dns_timeout: u64,
    #[serde(default)]
    pub disable_intra_vpc_collection: bool,
    #[serde(default)]
    pub source_excludes: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub dest_excludes: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub tcp_method: String,
    #[serde(default)]
    pub tcp_syn_paris_traceroute_mode: bool,
    #[serde(default = "default_namespace")]
    pub network_devices_namespace: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            connections_monitoring_enabled: false,
            workers: default_workers(),
            timeout: default_timeout_ms(),
            max_ttl: default_max_ttl(),
            input_chan_size: default_chan_size(),
            processing_chan_size: default_chan_size(),
            pathtest_contexts_limit: default_contexts_limit(),
            pathtest_ttl: default_pathtest_ttl_secs(),
            pathtest_interval: default_pathtest_interval_secs(),
            flush_interval: default_flush_interval_secs(),
            reverse_dns_enrichment_enabled: true,
            reverse_dns_timeout: default_reverse_dns_timeout_ms(),
            disable_intra_vpc_collection: false,
            source_excludes: HashMap::new(),
            dest_excludes: HashMap::new(),
            tcp_method: String::new(),
            tcp_syn_paris_traceroute_mode: false,
            network_devices_namespace: default_namespace(),
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

impl CollectorConfig {
    /// Apply the `DD_NETWORK_PATH_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        override_parsed(
            "DD_NETWORK_PATH_CONNECTIONS_MONITORING_ENABLED",
            &mut self.connections_monitoring_enabled,
        );
        override_parsed("DD_NETWORK_PATH_COLLECTOR_WORKERS", &mut self.workers);
        override_parsed("DD_NETWORK_PATH_COLLECTOR_TIMEOUT", &mut self.timeout);
        override_parsed("DD_NETWORK_PATH_COLLECTOR_MAX_TTL", &mut self.max_ttl);
        override_parsed(
            "DD_NETWORK_PATH_COLLECTOR_INPUT_CHAN_SIZE",
            &mut self.input_chan_size,
        );
        override_parsed(
            "DD_NETWORK_PATH_COLLECTOR_PROCESSING_CHAN_SIZE",
            &mut self.processing_chan_size,
        );
        override_parsed(
            "DD_NETWORK_PATH_COLLECTOR_PATHTEST_CONTEXTS_LIMIT",
            &mut self.pathtest_contexts_limit,
        );
        override_parsed(
            "DD_NETWORK_PATH_COLLECTOR_FLUSH_INTERVAL",
            &mut self.flush_interval,
        );
        override_parsed(
            "DD_NETWORK_PATH_COLLECTOR_REVERSE_DNS_ENRICHMENT_ENABLED",
            &mut self.reverse_dns_enrichment_enabled,
        );
        override_parsed(
            "DD_NETWORK_PATH_COLLECTOR_DISABLE_INTRA_VPC_COLLECTION",
            &mut self.disable_intra_vpc_collection,
        );
        if let Ok(method) = std::env::var("DD_NETWORK_PATH_COLLECTOR_TCP_METHOD") {
            self.tcp_method = method;
        }
        if let Ok(namespace) = std::env::var("DD_NETWORK_DEVICES_NAMESPACE") {
            self.network_devices_namespace = namespace;
        }
    }

    pub fn tcp_method(&self) -> TcpMethod {
        TcpMethod::from_config(&self.tcp_method)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn reverse_dns_timeout(&self) -> Duration {
        Duration::from_millis(self.reverse_dns_timeout)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval.max(1))
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            contexts_limit: self.pathtest_contexts_limit,
            ttl: Duration::from_secs(self.pathtest_ttl),
            interval: Duration::from_secs(self.pathtest_interval),
        }
    }
}

/// Load the collector configuration from a YAML file, then apply
/// environment overrides. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<CollectorConfig> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        if contents.trim().is_empty() {
            CollectorConfig::default()
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        }
    } else {
        CollectorConfig::default()
    };
    config.apply_env_overrides();
    Ok(config)
}
