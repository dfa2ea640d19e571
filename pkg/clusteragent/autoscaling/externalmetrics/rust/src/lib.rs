// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

pub mod backoff;
pub mod config;
pub mod errors;
pub mod model;
pub mod processor;
pub mod provider;
pub mod retriever;
pub mod selector;
pub mod store;

pub use config::{ExternalMetricsConfig, load_config};
pub use errors::ProviderError;
pub use model::{DatadogMetricInternal, MetricError};
pub use processor::{Point, Processor, ProcessorError};
pub use provider::{DatadogMetricProvider, ExternalMetricInfo, ExternalMetricValue};
pub use retriever::{LeaderCheck, MetricsRetriever};
pub use selector::LabelSelector;
pub use store::DatadogMetricsStore;
