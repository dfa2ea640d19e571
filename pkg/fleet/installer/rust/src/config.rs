// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Fleet-managed configuration files.
//!
//! Remote configuration arrives as an ordered list of JSON documents, each a
//! list of `{path, action, contents}` operations. The documents are reduced
//! into one `path -> contents` mapping, validated against an allow-list and
//! rendered as YAML into a versioned slot:
//!
//! ```text
//! <root>/<name>/config/
//!    stable     -> <version>
//!    experiment -> <version>   (optional)
//!    <version>/datadog.yaml
//!    <version>/conf.d/...
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use glob_match::glob_match;
use log::debug;
use normalize_path::NormalizePath;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::errors::InstallerError;
use crate::repository::{EXPERIMENT_LINK, STABLE_LINK, remove_link, replace_link};

const ALLOWED_PATHS: &[&str] = &[
    "/datadog.yaml",
    "/otel-config.yaml",
    "/security-agent.yaml",
    "/system-probe.yaml",
    "/application_monitoring.yaml",
    "/conf.d/*.yaml",
    "/conf.d/*.d/*.yaml",
];

/// Files of the fleet slot exposed next to the user's own configuration.
const OVERRIDES: &[(&str, &str)] = &[
    ("datadog.yaml", "datadog.yaml.override"),
    ("conf.d", "conf.d.override"),
];

#[derive(Debug, Deserialize)]
struct ConfigOperation {
    path: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    contents: Option<Box<RawValue>>,
}

impl ConfigOperation {
    fn is_remove(&self) -> bool {
        self.action == "remove"
    }
}

/// Merged configuration: normalized absolute path to raw JSON contents.
pub type ConfigFiles = BTreeMap<String, Box<RawValue>>;

fn normalize_config_path(path: &str) -> String {
    Path::new("/")
        .join(path.trim_start_matches('/'))
        .normalize()
        .to_string_lossy()
        .into_owned()
}

fn is_allowed(path: &str) -> bool {
    ALLOWED_PATHS.iter().any(|pattern| glob_match(pattern, path))
}

/// Reduce `docs` in order. An empty or unknown action adds, the last add
/// wins, and `remove` drops any earlier entry.
pub fn merge_configs<S: AsRef<str>>(docs: &[S]) -> Result<ConfigFiles, InstallerError> {
    let mut files = ConfigFiles::new();
    for doc in docs {
        let operations: Vec<ConfigOperation> = serde_json::from_str(doc.as_ref())
            .map_err(|e| InstallerError::ConfigUnmarshal(e.to_string()))?;
        for op in operations {
            let path = normalize_config_path(&op.path);
            if op.is_remove() {
                files.remove(&path);
                continue;
            }
            let contents = match op.contents {
                Some(contents) => contents,
                None => RawValue::from_string("null".to_string())
                    .map_err(|e| InstallerError::ConfigUnmarshal(e.to_string()))?,
            };
            files.insert(path, contents);
        }
    }

    if let Some((path, contents)) = files.iter().find(|(path, _)| !is_allowed(path)) {
        return Err(InstallerError::ConfigNotAllowed {
            path: path.clone(),
            action: "add".to_string(),
            contents: contents.get().to_string(),
        });
    }
    Ok(files)
}

/// Render every entry as YAML under `dir`, one atomic write per file.
pub fn write_config(dir: &Path, files: &ConfigFiles) -> Result<(), InstallerError> {
    for (path, contents) in files {
        let target = dir.join(path.trim_start_matches('/'));
        let value: serde_json::Value = serde_json::from_str(contents.get())
            .map_err(|e| InstallerError::ConfigUnmarshal(e.to_string()))?;
        let yaml = serde_yaml::to_string(&value)
            .map_err(|e| InstallerError::ConfigUnmarshal(e.to_string()))?;
        write_atomic(&target, yaml.as_bytes())?;
        debug!("wrote {}", target.display());
    }
    Ok(())
}

fn write_atomic(target: &Path, data: &[u8]) -> Result<(), InstallerError> {
    let parent = target.parent().unwrap_or(Path::new("/"));
    fs::create_dir_all(parent).map_err(InstallerError::io("creating", parent))?;
    let mut tmp =
        tempfile::NamedTempFile::new_in(parent).map_err(InstallerError::io("creating", parent))?;
    tmp.write_all(data)
        .map_err(InstallerError::io("writing", tmp.path().to_path_buf()))?;
    tmp.persist(target)
        .map_err(|e| InstallerError::io("persisting", target)(e.error))?;
    Ok(())
}

/// Expose the fleet slot in `user_dir` as `datadog.yaml.override` and
/// `conf.d.override`. Links whose fleet file is absent are removed. The
/// user's own files are never touched.
pub fn write_config_symlinks(user_dir: &Path, fleet_dir: &Path) -> Result<(), InstallerError> {
    fs::create_dir_all(user_dir).map_err(InstallerError::io("creating", user_dir))?;
    for (fleet_name, link_name) in OVERRIDES {
        let link = user_dir.join(link_name);
        let source = fleet_dir.join(fleet_name);
        if source.exists() {
            replace_link(&link, &source)?;
        } else {
            remove_link(&link)?;
        }
    }
    Ok(())
}

/// Reject versions that cannot name a slot directory.
pub fn validate_version(version: &str) -> Result<(), InstallerError> {
    let reserved = [".", "..", STABLE_LINK, EXPERIMENT_LINK];
    if version.is_empty() || version.contains('/') || reserved.contains(&version) {
        return Err(InstallerError::InvalidVersion(version.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigSlotState {
    pub stable: Option<String>,
    pub experiment: Option<String>,
}

/// Versioned configuration slots of one package.
#[derive(Debug, Clone)]
pub struct ConfigSlots {
    dir: PathBuf,
}

impl ConfigSlots {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn version_path(&self, version: &str) -> PathBuf {
        self.dir.join(version)
    }

    pub fn stable_path(&self) -> PathBuf {
        self.dir.join(STABLE_LINK)
    }

    pub fn experiment_path(&self) -> PathBuf {
        self.dir.join(EXPERIMENT_LINK)
    }

    pub fn state(&self) -> ConfigSlotState {
        let name = |link: PathBuf| {
            fs::read_link(link)
                .ok()
                .and_then(|t| t.file_name().map(|n| n.to_string_lossy().into_owned()))
        };
        ConfigSlotState {
            stable: name(self.stable_path()),
            experiment: name(self.experiment_path()),
        }
    }

    pub fn set_experiment(&self, version: &str) -> Result<(), InstallerError> {
        replace_link(&self.experiment_path(), Path::new(version))
    }

    pub fn set_stable(&self, version: &str) -> Result<(), InstallerError> {
        replace_link(&self.stable_path(), Path::new(version))
    }

    pub fn delete_experiment(&self) -> Result<bool, InstallerError> {
        remove_link(&self.experiment_path())
    }

    /// Remove version directories no link points to.
    pub fn cleanup(&self) -> Result<(), InstallerError> {
        let state = self.state();
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Ok(());
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            let referenced = state.stable.as_deref() == Some(name.as_str())
                || state.experiment.as_deref() == Some(name.as_str());
            if referenced || path.is_symlink() || !path.is_dir() {
                continue;
            }
            fs::remove_dir_all(&path).map_err(InstallerError::io("removing", &path))?;
        }
        Ok(())
    }
}
