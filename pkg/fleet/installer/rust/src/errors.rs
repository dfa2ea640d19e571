// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::path::PathBuf;

use thiserror::Error;

use crate::hooks::Hook;

/// How callers should react to an [`InstallerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Transient,
    Fatal,
}

#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("packages database is already open in this process")]
    DatabaseAlreadyOpen,
    #[error("packages database is closed")]
    DatabaseClosed,
    #[error("packages database error: {0}")]
    Database(String),
    #[error("invalid package url {0:?}")]
    InvalidUrl(String),
    #[error("could not download package from {url}: {message}")]
    Download { url: String, message: String },
    #[error("digest mismatch for {package}: expected {expected}, got {actual}")]
    DigestMismatch {
        package: String,
        expected: String,
        actual: String,
    },
    #[error("package {0} is not installed")]
    PackageNotInstalled(String),
    #[error("package {0} has no experiment")]
    NoExperiment(String),
    #[error("experiment for {package} has the same digest as stable ({digest})")]
    ExperimentSameAsStable { package: String, digest: String },
    #[error("invalid version {0:?}")]
    InvalidVersion(String),
    #[error("could not unmarshal config files: {0}")]
    ConfigUnmarshal(String),
    #[error("config file {{{path} {action} {contents}}} is not allowed")]
    ConfigNotAllowed {
        path: String,
        action: String,
        contents: String,
    },
    #[error("{hook} hook failed for {package}: {message}")]
    Hook {
        hook: Hook,
        package: String,
        message: String,
    },
    #[error("{context} {}: {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl InstallerError {
    pub(crate) fn io(
        context: &'static str,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| InstallerError::Io {
            context,
            path,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallerError::PackageNotInstalled(_) | InstallerError::NoExperiment(_) => {
                ErrorKind::NotFound
            }
            InstallerError::InvalidUrl(_)
            | InstallerError::DigestMismatch { .. }
            | InstallerError::ExperimentSameAsStable { .. }
            | InstallerError::InvalidVersion(_)
            | InstallerError::ConfigUnmarshal(_)
            | InstallerError::ConfigNotAllowed { .. } => ErrorKind::InvalidArgument,
            InstallerError::Download { .. } | InstallerError::Hook { .. } => ErrorKind::Transient,
            InstallerError::DatabaseAlreadyOpen
            | InstallerError::DatabaseClosed
            | InstallerError::Database(_)
            | InstallerError::Io { .. } => ErrorKind::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_not_allowed_message() {
        let err = InstallerError::ConfigNotAllowed {
            path: "/etc/passwd".to_string(),
            action: "add".to_string(),
            contents: r#"{"test": "data"}"#.to_string(),
        };
        assert_eq!(
            err.to_string(),
            r#"config file {/etc/passwd add {"test": "data"}} is not allowed"#
        );
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(InstallerError::DatabaseAlreadyOpen.kind(), ErrorKind::Fatal);
        assert_eq!(
            InstallerError::PackageNotInstalled("datadog-agent".to_string()).kind(),
            ErrorKind::NotFound
        );
    }
}
