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

pub mod config;
pub mod db;
pub mod downloader;
pub mod errors;
pub mod hooks;
pub mod installer;
pub mod repository;

pub use config::{ConfigFiles, ConfigSlotState, merge_configs, write_config, write_config_symlinks};
pub use db::{InstallMethod, PackageRecord, PackagesDb};
pub use downloader::{DownloadedPackage, Downloader, LocalDownloader};
pub use errors::{ErrorKind, InstallerError};
pub use hooks::{Hook, HookContext, Hooks, LogHooks, PackageType};
pub use installer::{Installer, PackageState};
