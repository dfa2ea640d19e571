// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

pub const PREFIX: &str = "datadog.network_path.collector.";

pub const CONNS_SKIPPED: &str = "schedule.conns_skipped";
pub const CONNS_RECEIVED: &str = "schedule.conns_received";
pub const SCHEDULE_DURATION: &str = "schedule.duration";
pub const SCHEDULE_PATHTEST_COUNT: &str = "schedule.pathtest_count";
pub const SCHEDULE_PATHTEST_PROCESSED: &str = "schedule.pathtest_processed";
pub const SCHEDULE_PATHTEST_DROPPED: &str = "schedule.pathtest_dropped";

pub const WORKERS: &str = "workers";
pub const STORE_SIZE: &str = "pathtest_store_size";
pub const PROCESSING_CHAN_SIZE: &str = "processing_chan_size";
pub const INPUT_CHAN_SIZE: &str = "input_chan_size";
pub const FLUSH_INTERVAL: &str = "flush.interval";
pub const FLUSH_DURATION: &str = "flush.duration";
pub const FLUSH_PATHTEST_COUNT: &str = "flush.pathtest_count";
pub const FLUSH_PATHTEST_PROCESSED: &str = "flush.pathtest_processed";
pub const FLUSH_PATHTEST_DROPPED: &str = "flush.pathtest_dropped";

pub const WORKER_TASK_DURATION: &str = "worker.task_duration";
pub const WORKER_PATHTEST_PROCESSED: &str = "worker.pathtest_processed";
pub const WORKER_PATHTEST_INTERVAL: &str = "worker.pathtest_interval";

pub const RDNS_SUCCESSES: &str = "reverse_dns_lookup.successes";
pub const RDNS_FAILURES: &str = "reverse_dns_lookup.failures";
pub const RDNS_RESULTS_LENGTH_MISMATCH: &str = "reverse_dns_lookup.results_length_mismatch";

/// Full metric name for a collector metric.
pub fn name(suffix: &str) -> String {
    format!("{PREFIX}{suffix}")
}
