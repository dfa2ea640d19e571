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

pub mod collector;
pub mod config;
pub mod connection;
pub mod errors;
pub mod filter;
pub mod forwarder;
pub mod metrics;
pub mod pathtest;
pub mod payload;
pub mod rdns;
pub mod store;
pub mod subnets;
pub mod traceroute;

pub use collector::{Dependencies, NpCollector};
pub use config::{CollectorConfig, load_config};
pub use errors::Error;
pub use pathtest::{Pathtest, PathtestMetadata};
pub use payload::{NetworkPath, PathOrigin, Protocol, TcpMethod};
