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

//! Agent-formatted logging for the Rust components.
//!
//! Lines look like the ones produced by the Go agent:
//!
//! ```text
//! 2025-01-01 12:00:00 UTC | CORE | INFO | (src/store.rs:42 in dd_tagger::store) | message
//! ```

mod limit;

pub use limit::LogLimit;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;

const DEFAULT_LOGGER_NAME: &str = "CORE";

#[derive(Error, Debug)]
pub enum Error {
    #[error("logger already initialized")]
    AlreadyInitialized,
    #[error("invalid log level: {0}")]
    InvalidLevel(String),
    #[error("could not open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Builds and installs the process logger.
#[derive(Debug, Clone)]
pub struct Builder {
    level: LevelFilter,
    logger_name: String,
    file: Option<PathBuf>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            logger_name: DEFAULT_LOGGER_NAME.to_string(),
            file: None,
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    /// Name displayed in the second column (`CORE`, `INSTALLER`, ...).
    pub fn logger_name(mut self, name: &str) -> Self {
        self.logger_name = name.to_uppercase();
        self
    }

    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    fn build(self) -> Result<AgentLogger, Error> {
        let file = match self.file {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|source| Error::LogFile { path, source })?,
            ),
            None => None,
        };
        Ok(AgentLogger {
            level: self.level,
            logger_name: self.logger_name,
            file: Mutex::new(file),
        })
    }

    pub fn init(self) -> Result<(), Error> {
        let level = self.level;
        let logger = self.build()?;
        log::set_boxed_logger(Box::new(logger)).map_err(|_| Error::AlreadyInitialized)?;
        log::set_max_level(level);
        Ok(())
    }
}

/// Install the logger at `level`, writing to stdout/stderr only.
pub fn init_with_level(level: Level) -> Result<(), Error> {
    Builder::new().level(level.to_level_filter()).init()
}

/// Install the logger using `DD_LOG_LEVEL` and `DD_LOG_FILE`.
pub fn init_from_env(logger_name: &str) -> Result<(), Error> {
    let mut builder = Builder::new().logger_name(logger_name);
    if let Ok(level) = std::env::var("DD_LOG_LEVEL") {
        builder = builder.level(parse_level(&level)?);
    }
    if let Ok(path) = std::env::var("DD_LOG_FILE")
        && !path.is_empty()
    {
        builder = builder.file(path);
    }
    builder.init()
}

/// Parse an agent log level. `warning` and `critical` are accepted as
/// aliases since they appear in agent configuration files.
pub fn parse_level(level: &str) -> Result<LevelFilter, Error> {
    match level.trim().to_lowercase().as_str() {
        "warning" => Ok(LevelFilter::Warn),
        "critical" => Ok(LevelFilter::Error),
        other => LevelFilter::from_str(other).map_err(|_| Error::InvalidLevel(level.to_string())),
    }
}

struct AgentLogger {
    level: LevelFilter,
    logger_name: String,
    file: Mutex<Option<File>>,
}

impl Log for AgentLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(&self.logger_name, OffsetDateTime::now_utc(), record);

        // Nothing sensible can be done when writing a log line fails.
        let _ = match record.level() {
            Level::Error | Level::Warn => std::io::stderr().write_all(line.as_bytes()),
            _ => std::io::stdout().write_all(line.as_bytes()),
        };
        if let Ok(mut guard) = self.file.lock()
            && let Some(file) = guard.as_mut()
        {
            let _ = file.write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
        if let Ok(mut guard) = self.file.lock()
            && let Some(file) = guard.as_mut()
        {
            let _ = file.flush();
        }
    }
}

fn format_line(logger_name: &str, now: OffsetDateTime, record: &Record<'_>) -> String {
    let timestamp = now
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_default();
    format!(
        "{} UTC | {} | {} | ({}:{} in {}) | {}\n",
        timestamp,
        logger_name,
        record.level(),
        record.file().unwrap_or("<unknown>"),
        record.line().unwrap_or(0),
        record.module_path().unwrap_or("<unknown>"),
        record.args()
    )
}
